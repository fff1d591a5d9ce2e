// 📝 Flag Forms - validated input for flag states and flag metadata
// Errors are collected per field; nothing is persisted until the form is valid

use crate::conditions::ConditionRegistry;
use crate::db::{insert_flag_metadata, insert_flag_state, FlagMetadata, FlagState, InsertOutcome};
use crate::validation::REQUIRED_MESSAGE;
use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Key for errors that belong to the whole form
pub const NON_FIELD_ERRORS: &str = "__all__";

/// Raw submitted input: field name -> text
pub type FormData = BTreeMap<String, String>;

/// Build `FormData` from pairs
pub fn form_data<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> FormData
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

// ============================================================================
// ERRORS
// ============================================================================

/// Validation messages grouped by field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.0
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Why a form could not be saved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("cannot save an unbound form")]
    Unbound,

    #[error("invalid form: {0}")]
    Invalid(FieldErrors),

    /// Uniqueness violation, reported under `NON_FIELD_ERRORS`
    #[error("{0}")]
    Duplicate(FieldErrors),
}

impl FormError {
    fn duplicate(message: &str) -> Self {
        let mut errors = FieldErrors::new();
        errors.add(NON_FIELD_ERRORS, message);
        FormError::Duplicate(errors)
    }
}

// ============================================================================
// FIELD DEFINITIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// Allowed `(value, label)` pairs
    Choice(Vec<(String, String)>),
    Checkbox,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationRule {
    Required,
    MaxLength(usize),
}

/// One input field of a form
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub rules: Vec<ValidationRule>,
    pub help_text: String,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        FieldDefinition {
            label: default_label(&name),
            name,
            kind,
            rules: Vec::new(),
            help_text: String::new(),
        }
    }

    /// Builder: add validation rule
    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Builder: add help text
    pub fn with_help_text(mut self, text: impl Into<String>) -> Self {
        self.help_text = text.into();
        self
    }

    pub fn is_required(&self) -> bool {
        self.rules.contains(&ValidationRule::Required)
    }

    /// Allowed choices; empty for non-choice fields
    pub fn choices(&self) -> &[(String, String)] {
        match &self.kind {
            FieldKind::Choice(choices) => choices,
            _ => &[],
        }
    }

    /// Normalize and check one raw value
    fn clean(&self, raw: Option<&str>) -> Result<FieldValue, String> {
        if self.kind == FieldKind::Checkbox {
            return Ok(FieldValue::Bool(checkbox_value(raw)));
        }

        let value = raw.map(str::trim).unwrap_or("");

        if value.is_empty() {
            if self.is_required() {
                return Err(REQUIRED_MESSAGE.to_string());
            }
            return Ok(FieldValue::Text(String::new()));
        }

        for rule in &self.rules {
            if let ValidationRule::MaxLength(max) = rule {
                let length = value.chars().count();
                if length > *max {
                    return Err(format!(
                        "Ensure this value has at most {} characters (it has {}).",
                        max, length
                    ));
                }
            }
        }

        if let FieldKind::Choice(choices) = &self.kind {
            if !choices.iter().any(|(choice, _)| choice == value) {
                return Err(format!(
                    "Select a valid choice. {} is not one of the available choices.",
                    value
                ));
            }
        }

        Ok(FieldValue::Text(value.to_string()))
    }
}

fn default_label(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Missing/empty, "false" and "0" are unchecked, anything else is checked
fn checkbox_value(raw: Option<&str>) -> bool {
    match raw.map(|v| v.trim().to_lowercase()) {
        None => false,
        Some(v) => !matches!(v.as_str(), "" | "false" | "0"),
    }
}

// ============================================================================
// CLEANED DATA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
}

/// Values that passed validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanedData(BTreeMap<String, FieldValue>);

impl CleanedData {
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.0.get(field) {
            Some(FieldValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    pub fn flag(&self, field: &str) -> bool {
        matches!(self.0.get(field), Some(FieldValue::Bool(true)))
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
}

// ============================================================================
// BOUND FORM
// ============================================================================

/// Field list plus the result of validating submitted data against it
#[derive(Debug, Clone)]
struct BoundForm {
    fields: Vec<FieldDefinition>,
    bound: bool,
    cleaned: CleanedData,
    errors: FieldErrors,
}

impl BoundForm {
    fn unbound(fields: Vec<FieldDefinition>) -> Self {
        BoundForm {
            fields,
            bound: false,
            cleaned: CleanedData::default(),
            errors: FieldErrors::new(),
        }
    }

    fn bind(fields: Vec<FieldDefinition>, data: &FormData) -> Self {
        let mut form = Self::unbound(fields);
        form.bound = true;

        for field in &form.fields {
            match field.clean(data.get(&field.name).map(String::as_str)) {
                Ok(value) => {
                    form.cleaned.0.insert(field.name.clone(), value);
                }
                Err(message) => form.errors.add(&field.name, message),
            }
        }

        form
    }

    /// Attach an error and drop the field from the cleaned data
    fn add_error(&mut self, field: &str, message: impl Into<String>) {
        self.cleaned.0.remove(field);
        self.errors.add(field, message);
    }

    fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn error_help(&self) -> Vec<(&str, &str)> {
        self.fields
            .iter()
            .filter(|f| self.errors.contains(&f.name) && !f.help_text.is_empty())
            .map(|f| (f.label.as_str(), f.help_text.as_str()))
            .collect()
    }

    fn is_valid(&self) -> bool {
        self.bound && self.errors.is_empty()
    }

    fn ensure_valid(&self) -> Result<(), FormError> {
        if !self.bound {
            return Err(FormError::Unbound);
        }
        if !self.errors.is_empty() {
            return Err(FormError::Invalid(self.errors.clone()));
        }
        Ok(())
    }

    fn text(&self, field: &str) -> String {
        self.cleaned.text(field).unwrap_or_default().to_string()
    }
}

// ============================================================================
// FLAG STATE FORM
// ============================================================================

/// Form for `name / condition / value` flag states.
///
/// The condition choices are read from the registry when the form is
/// constructed, so conditions registered at runtime show up in every form
/// built afterwards.
#[derive(Debug, Clone)]
pub struct FlagStateForm {
    form: BoundForm,
}

impl FlagStateForm {
    fn field_definitions(registry: &ConditionRegistry) -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::new("name", FieldKind::Text)
                .with_validation(ValidationRule::Required)
                .with_validation(ValidationRule::MaxLength(64)),
            FieldDefinition::new("condition", FieldKind::Choice(registry.choices()))
                .with_validation(ValidationRule::Required)
                .with_validation(ValidationRule::MaxLength(64)),
            FieldDefinition::new("value", FieldKind::Text)
                .with_validation(ValidationRule::Required)
                .with_validation(ValidationRule::MaxLength(127))
                .with_help_text("Interpreted by the selected condition"),
            FieldDefinition::new("required", FieldKind::Checkbox)
                .with_help_text("All required conditions must be met for the flag to be enabled"),
        ]
    }

    /// Form with no submitted data, for rendering choices
    pub fn unbound(registry: &ConditionRegistry) -> Self {
        FlagStateForm {
            form: BoundForm::unbound(Self::field_definitions(registry)),
        }
    }

    pub fn new(data: &FormData, registry: &ConditionRegistry) -> Self {
        let mut form = BoundForm::bind(Self::field_definitions(registry), data);

        // The value is only meaningful relative to a valid condition
        let checked = match (form.cleaned.text("condition"), form.cleaned.text("value")) {
            (Some(condition), Some(value)) => registry
                .get(condition)
                .map(|entry| entry.validate(value)),
            _ => None,
        };
        if let Some(Err(message)) = checked {
            form.add_error("value", message);
        }

        FlagStateForm { form }
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.form.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.form.field(name)
    }

    pub fn is_bound(&self) -> bool {
        self.form.bound
    }

    pub fn is_valid(&self) -> bool {
        self.form.is_valid()
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.form.errors
    }

    /// `(label, help text)` for each field that failed and carries help text
    pub fn error_help(&self) -> Vec<(&str, &str)> {
        self.form.error_help()
    }

    pub fn cleaned_data(&self) -> &CleanedData {
        &self.form.cleaned
    }

    /// Build the record without persisting it
    pub fn to_record(&self) -> Result<FlagState, FormError> {
        self.form.ensure_valid()?;
        Ok(FlagState::new(
            self.form.text("name"),
            self.form.text("condition"),
            self.form.text("value"),
            self.form.cleaned.flag("required"),
        ))
    }

    /// Persist the validated state
    pub fn save(&self, conn: &Connection) -> Result<FlagState> {
        let state = self.to_record()?;

        match insert_flag_state(conn, &state, "flag_state_form")? {
            InsertOutcome::Inserted => Ok(state),
            InsertOutcome::Duplicate => Err(FormError::duplicate(
                "Flag state with this Name, Condition and Value already exists.",
            )
            .into()),
        }
    }
}

// ============================================================================
// FLAG METADATA FORM
// ============================================================================

/// Form for `name / key / value` flag metadata
#[derive(Debug, Clone)]
pub struct FlagMetadataForm {
    form: BoundForm,
}

impl FlagMetadataForm {
    fn field_definitions() -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::new("name", FieldKind::Text)
                .with_validation(ValidationRule::Required)
                .with_validation(ValidationRule::MaxLength(64)),
            FieldDefinition::new("key", FieldKind::Text)
                .with_validation(ValidationRule::Required)
                .with_validation(ValidationRule::MaxLength(64)),
            FieldDefinition::new("value", FieldKind::Text)
                .with_validation(ValidationRule::Required),
        ]
    }

    pub fn unbound() -> Self {
        FlagMetadataForm {
            form: BoundForm::unbound(Self::field_definitions()),
        }
    }

    pub fn new(data: &FormData) -> Self {
        FlagMetadataForm {
            form: BoundForm::bind(Self::field_definitions(), data),
        }
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.form.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.form.field(name)
    }

    pub fn is_valid(&self) -> bool {
        self.form.is_valid()
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.form.errors
    }

    pub fn error_help(&self) -> Vec<(&str, &str)> {
        self.form.error_help()
    }

    pub fn cleaned_data(&self) -> &CleanedData {
        &self.form.cleaned
    }

    pub fn to_record(&self) -> Result<FlagMetadata, FormError> {
        self.form.ensure_valid()?;
        Ok(FlagMetadata::new(
            self.form.text("name"),
            self.form.text("key"),
            self.form.text("value"),
        ))
    }

    pub fn save(&self, conn: &Connection) -> Result<FlagMetadata> {
        let metadata = self.to_record()?;

        match insert_flag_metadata(conn, &metadata, "flag_metadata_form")? {
            InsertOutcome::Inserted => Ok(metadata),
            InsertOutcome::Duplicate => Err(FormError::duplicate(
                "Flag metadata with this Name and Key already exists.",
            )
            .into()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{ConditionError, FlagContext};
    use crate::db::{get_flag_states, setup_database};
    use crate::validation::BOOLEAN_MESSAGE;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn errors(pairs: &[(&str, &str)]) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (field, message) in pairs {
            map.entry(field.to_string()).or_default().push(message.to_string());
        }
        map
    }

    fn fake_condition(_value: &str, _ctx: &FlagContext) -> Result<bool, ConditionError> {
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Flag metadata
    // ------------------------------------------------------------------------

    #[test]
    fn test_metadata_valid_data() {
        let conn = test_db();
        let form = FlagMetadataForm::new(&form_data([
            ("name", "FLAG_ENABLED"),
            ("key", "help_text"),
            ("value", "enable a cool thing"),
        ]));

        assert!(form.is_valid());
        let metadata = form.save(&conn).unwrap();
        assert_eq!(metadata.name, "FLAG_ENABLED");
        assert_eq!(metadata.key, "help_text");
        assert_eq!(metadata.value, "enable a cool thing");
    }

    #[test]
    fn test_metadata_blank_data() {
        let form = FlagMetadataForm::new(&FormData::new());

        assert!(!form.is_valid());
        assert_eq!(
            form.errors().as_map(),
            &errors(&[
                ("name", REQUIRED_MESSAGE),
                ("key", REQUIRED_MESSAGE),
                ("value", REQUIRED_MESSAGE),
            ])
        );
    }

    #[test]
    fn test_metadata_whitespace_is_blank() {
        let form = FlagMetadataForm::new(&form_data([
            ("name", "FLAG_ENABLED"),
            ("key", "   "),
            ("value", "x"),
        ]));

        assert_eq!(form.errors().as_map(), &errors(&[("key", REQUIRED_MESSAGE)]));
    }

    #[test]
    fn test_metadata_duplicate_key() {
        let conn = test_db();
        let data = form_data([("name", "FLAG_ENABLED"), ("key", "help_text"), ("value", "a")]);

        FlagMetadataForm::new(&data).save(&conn).unwrap();
        let err = FlagMetadataForm::new(&data).save(&conn).unwrap_err();

        assert!(matches!(err.downcast_ref::<FormError>(), Some(FormError::Duplicate(_))));
    }

    // ------------------------------------------------------------------------
    // Flag state
    // ------------------------------------------------------------------------

    #[test]
    fn test_state_valid_data() {
        let conn = test_db();
        let registry = ConditionRegistry::with_defaults();
        let form = FlagStateForm::new(
            &form_data([("name", "FLAG_ENABLED"), ("condition", "boolean"), ("value", "True")]),
            &registry,
        );

        assert!(form.is_valid());
        let state = form.save(&conn).unwrap();
        assert_eq!(state.name, "FLAG_ENABLED");
        assert_eq!(state.condition, "boolean");
        assert_eq!(state.value, "True");
        assert!(!state.required);

        let stored = get_flag_states(&conn, "FLAG_ENABLED").unwrap();
        assert_eq!(stored, vec![state]);
    }

    #[test]
    fn test_state_blank_data() {
        let registry = ConditionRegistry::with_defaults();
        let form = FlagStateForm::new(&FormData::new(), &registry);

        assert!(!form.is_valid());
        assert_eq!(
            form.errors().as_map(),
            &errors(&[
                ("name", REQUIRED_MESSAGE),
                ("condition", REQUIRED_MESSAGE),
                ("value", REQUIRED_MESSAGE),
            ])
        );
    }

    #[test]
    fn test_state_bad_data() {
        let registry = ConditionRegistry::with_defaults();
        let form = FlagStateForm::new(
            &form_data([("name", "FLAG_ENABLED"), ("condition", "boolean"), ("value", "flase")]),
            &registry,
        );

        assert!(!form.is_valid());
        assert_eq!(
            form.errors().as_map(),
            &errors(&[("value", "Enter one of 'on', 'off', 'true', 'false', etc.")])
        );
    }

    #[test]
    fn test_state_unknown_condition() {
        let registry = ConditionRegistry::with_defaults();
        let form = FlagStateForm::new(
            &form_data([("name", "FLAG_ENABLED"), ("condition", "nope"), ("value", "flase")]),
            &registry,
        );

        assert!(!form.is_valid());
        assert_eq!(
            form.errors().as_map(),
            &errors(&[(
                "condition",
                "Select a valid choice. nope is not one of the available choices."
            )])
        );
        assert_eq!(form.cleaned_data().text("name"), Some("FLAG_ENABLED"));
    }

    #[test]
    fn test_state_value_uses_condition_validator() {
        let registry = ConditionRegistry::with_defaults();

        let user = FlagStateForm::new(
            &form_data([("name", "FLAG_ENABLED"), ("condition", "user"), ("value", "alice")]),
            &registry,
        );
        assert!(user.is_valid());

        let path = FlagStateForm::new(
            &form_data([("name", "FLAG_ENABLED"), ("condition", "path matches"), ("value", "(")]),
            &registry,
        );
        assert_eq!(
            path.errors().get("value"),
            Some(&["Enter a valid regular expression.".to_string()][..])
        );

        let anonymous = FlagStateForm::new(
            &form_data([("name", "FLAG_ENABLED"), ("condition", "anonymous"), ("value", "maybe")]),
            &registry,
        );
        assert_eq!(anonymous.errors().get("value"), Some(&[BOOLEAN_MESSAGE.to_string()][..]));
    }

    #[test]
    fn test_state_max_length() {
        let registry = ConditionRegistry::with_defaults();
        let long_name = "F".repeat(70);
        let form = FlagStateForm::new(
            &form_data([
                ("name", long_name.as_str()),
                ("condition", "boolean"),
                ("value", "on"),
            ]),
            &registry,
        );

        assert_eq!(
            form.errors().as_map(),
            &errors(&[("name", "Ensure this value has at most 64 characters (it has 70).")])
        );
    }

    #[test]
    fn test_state_required_checkbox() {
        let registry = ConditionRegistry::with_defaults();
        let form = FlagStateForm::new(
            &form_data([
                ("name", "FLAG_ENABLED"),
                ("condition", "boolean"),
                ("value", "on"),
                ("required", "on"),
            ]),
            &registry,
        );

        assert!(form.is_valid());
        assert!(form.to_record().unwrap().required);

        let unchecked = FlagStateForm::new(
            &form_data([
                ("name", "FLAG_ENABLED"),
                ("condition", "boolean"),
                ("value", "on"),
                ("required", "false"),
            ]),
            &registry,
        );
        assert!(!unchecked.to_record().unwrap().required);
    }

    #[test]
    fn test_zero_leaves_checkbox_unchecked() {
        let registry = ConditionRegistry::with_defaults();
        for raw in ["0", " 0 ", ""] {
            let form = FlagStateForm::new(
                &form_data([
                    ("name", "FLAG_ENABLED"),
                    ("condition", "boolean"),
                    ("value", "on"),
                    ("required", raw),
                ]),
                &registry,
            );
            assert!(!form.to_record().unwrap().required, "{:?} should be unchecked", raw);
        }

        assert!(checkbox_value(Some("1")));
        assert!(checkbox_value(Some("yes")));
        assert!(!checkbox_value(None));
    }

    #[test]
    fn test_state_duplicate_rejected_on_save() {
        let conn = test_db();
        let registry = ConditionRegistry::with_defaults();
        let data = form_data([("name", "FLAG_ENABLED"), ("condition", "boolean"), ("value", "True")]);

        FlagStateForm::new(&data, &registry).save(&conn).unwrap();
        let err = FlagStateForm::new(&data, &registry).save(&conn).unwrap_err();

        match err.downcast_ref::<FormError>() {
            Some(FormError::Duplicate(errors)) => {
                assert_eq!(
                    errors.get(NON_FIELD_ERRORS),
                    Some(&["Flag state with this Name, Condition and Value already exists.".to_string()][..])
                );
                assert_eq!(errors.len(), 1);
            }
            other => panic!("expected duplicate error, got {:?}", other),
        }
        assert_eq!(
            err.to_string(),
            "__all__: Flag state with this Name, Condition and Value already exists."
        );
    }

    #[test]
    fn test_save_invalid_form_fails() {
        let conn = test_db();
        let registry = ConditionRegistry::with_defaults();

        let err = FlagStateForm::new(&FormData::new(), &registry)
            .save(&conn)
            .unwrap_err();
        match err.downcast_ref::<FormError>() {
            Some(FormError::Invalid(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected invalid form error, got {:?}", other),
        }

        let unbound = FlagStateForm::unbound(&registry);
        assert!(!unbound.is_valid());
        assert!(unbound.errors().is_empty());
        assert_eq!(unbound.to_record().unwrap_err(), FormError::Unbound);
    }

    #[test]
    fn test_condition_choices_are_bound_late() {
        let registry = ConditionRegistry::with_defaults();
        let before = FlagStateForm::unbound(&registry);

        let guard = registry.scoped("fake_condition", fake_condition).unwrap();

        let form = FlagStateForm::unbound(&registry);
        let choice = ("fake_condition".to_string(), "fake_condition".to_string());
        assert!(form.field("condition").unwrap().choices().contains(&choice));

        // Forms built earlier keep their own snapshot
        assert!(!before.field("condition").unwrap().choices().contains(&choice));

        // And the new condition validates immediately
        let bound = FlagStateForm::new(
            &form_data([("name", "FLAG_ENABLED"), ("condition", "fake_condition"), ("value", "yes")]),
            &registry,
        );
        assert!(bound.is_valid());

        drop(guard);
        let after = FlagStateForm::unbound(&registry);
        assert!(!after.field("condition").unwrap().choices().contains(&choice));
    }

    #[test]
    fn test_field_labels_and_display() {
        let registry = ConditionRegistry::with_defaults();
        let form = FlagStateForm::unbound(&registry);

        let labels: Vec<&str> = form.fields().iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, vec!["Name", "Condition", "Value", "Required"]);
        assert!(!form.field("required").unwrap().is_required());

        let mut errors = FieldErrors::new();
        errors.add("name", REQUIRED_MESSAGE);
        errors.add(NON_FIELD_ERRORS, "broken");
        assert_eq!(errors.to_string(), "__all__: broken; name: This field is required.");
    }

    #[test]
    fn test_help_text_for_failed_fields() {
        let registry = ConditionRegistry::with_defaults();
        let form = FlagStateForm::unbound(&registry);
        assert_eq!(
            form.field("value").unwrap().help_text,
            "Interpreted by the selected condition"
        );
        assert!(form.error_help().is_empty());

        let invalid = FlagStateForm::new(
            &form_data([("name", ""), ("condition", "boolean"), ("value", "flase")]),
            &registry,
        );
        // `name` failed too, but has no help text
        assert_eq!(
            invalid.error_help(),
            vec![("Value", "Interpreted by the selected condition")]
        );

        let metadata = FlagMetadataForm::new(&form_data([("name", "FLAG_ENABLED")]));
        assert!(metadata.errors().contains("key"));
        assert!(metadata.error_help().is_empty());
    }
}
