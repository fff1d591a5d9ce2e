// 🧩 Condition Registry - named predicates that decide whether a flag is on
// Conditions are plugins: registered at runtime, looked up by name

use crate::validation::{
    parse_date, strtobool, validate_boolean, validate_date, validate_parameter,
    validate_path_re, validate_user,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Misuse of the registry (a configuration error, not user input)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("condition already registered: {0}")]
    AlreadyRegistered(String),

    #[error("condition not registered: {0}")]
    NotRegistered(String),
}

/// Failure while evaluating a condition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("condition '{condition}' requires {missing}")]
    RequiredForCondition {
        condition: String,
        missing: &'static str,
    },

    #[error("condition '{condition}' cannot use value {value:?}: {reason}")]
    InvalidValue {
        condition: String,
        value: String,
        reason: String,
    },
}

// ============================================================================
// EVALUATION CONTEXT
// ============================================================================

/// Request-like data some conditions look at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Authenticated username; `None` means anonymous
    pub username: Option<String>,
    pub params: HashMap<String, String>,
    pub path: String,
}

impl RequestInfo {
    pub fn new(path: impl Into<String>) -> Self {
        RequestInfo {
            username: None,
            params: HashMap::new(),
            path: path.into(),
        }
    }

    pub fn with_user(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }
}

/// Everything an evaluator may consult when checking a flag
#[derive(Debug, Clone, Default)]
pub struct FlagContext {
    pub request: Option<RequestInfo>,
    /// Fixed evaluation time; `None` means "now"
    pub now: Option<DateTime<Utc>>,
}

impl FlagContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request(mut self, request: RequestInfo) -> Self {
        self.request = Some(request);
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    fn require_request(&self, condition: &str) -> Result<&RequestInfo, ConditionError> {
        self.request
            .as_ref()
            .ok_or_else(|| ConditionError::RequiredForCondition {
                condition: condition.to_string(),
                missing: "a request",
            })
    }
}

// ============================================================================
// CONDITION ENTRY
// ============================================================================

pub type Evaluator = Arc<dyn Fn(&str, &FlagContext) -> Result<bool, ConditionError> + Send + Sync>;
pub type ValueValidator = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

/// A registered condition: its evaluator plus an optional value validator
#[derive(Clone)]
pub struct ConditionEntry {
    pub name: String,
    evaluator: Evaluator,
    validator: Option<ValueValidator>,
}

impl ConditionEntry {
    pub fn evaluate(&self, value: &str, ctx: &FlagContext) -> Result<bool, ConditionError> {
        (self.evaluator)(value, ctx)
    }

    /// Validate a stored value. Conditions without their own validator
    /// accept boolean tokens only.
    pub fn validate(&self, value: &str) -> Result<(), String> {
        match &self.validator {
            Some(validator) => validator(value),
            None => validate_boolean(value),
        }
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }
}

impl fmt::Debug for ConditionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionEntry")
            .field("name", &self.name)
            .field("has_validator", &self.has_validator())
            .finish()
    }
}

// ============================================================================
// CONDITION REGISTRY
// ============================================================================

/// Registry of condition evaluators, keyed by name.
///
/// Cloning gives another handle to the same registry, so whoever composes
/// the forms and the flag checker passes one registry to both. Forms read
/// the names when they are constructed, which means conditions registered
/// at runtime are selectable immediately.
#[derive(Clone, Default)]
pub struct ConditionRegistry {
    conditions: Arc<RwLock<BTreeMap<String, ConditionEntry>>>,
}

impl ConditionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in conditions
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register_defaults();
        registry
    }

    fn register_defaults(&self) {
        let mut conditions = self.write();

        insert_builtin(&mut conditions, "boolean", Arc::new(boolean_condition), Arc::new(validate_boolean));
        insert_builtin(&mut conditions, "user", Arc::new(user_condition), Arc::new(validate_user));
        insert_builtin(&mut conditions, "anonymous", Arc::new(anonymous_condition), Arc::new(validate_boolean));
        insert_builtin(&mut conditions, "parameter", Arc::new(parameter_condition), Arc::new(validate_parameter));
        insert_builtin(&mut conditions, "path matches", Arc::new(path_condition), Arc::new(validate_path_re));
        insert_builtin(&mut conditions, "after date", Arc::new(after_date_condition), Arc::new(validate_date));
        insert_builtin(&mut conditions, "before date", Arc::new(before_date_condition), Arc::new(validate_date));
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ConditionEntry>> {
        self.conditions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ConditionEntry>> {
        self.conditions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a condition whose values are boolean tokens
    pub fn register<F>(&self, name: &str, evaluator: F) -> Result<(), RegistryError>
    where
        F: Fn(&str, &FlagContext) -> Result<bool, ConditionError> + Send + Sync + 'static,
    {
        self.insert(name, Arc::new(evaluator), None)
    }

    /// Register a condition with its own value validator
    pub fn register_with_validator<F, V>(
        &self,
        name: &str,
        evaluator: F,
        validator: V,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&str, &FlagContext) -> Result<bool, ConditionError> + Send + Sync + 'static,
        V: Fn(&str) -> Result<(), String> + Send + Sync + 'static,
    {
        self.insert(name, Arc::new(evaluator), Some(Arc::new(validator)))
    }

    fn insert(
        &self,
        name: &str,
        evaluator: Evaluator,
        validator: Option<ValueValidator>,
    ) -> Result<(), RegistryError> {
        let mut conditions = self.write();

        if conditions.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }

        conditions.insert(
            name.to_string(),
            ConditionEntry {
                name: name.to_string(),
                evaluator,
                validator,
            },
        );
        tracing::debug!(condition = name, "registered condition");
        Ok(())
    }

    /// Register a condition for as long as the returned guard lives
    pub fn scoped<F>(&self, name: &str, evaluator: F) -> Result<ScopedCondition, RegistryError>
    where
        F: Fn(&str, &FlagContext) -> Result<bool, ConditionError> + Send + Sync + 'static,
    {
        self.register(name, evaluator)?;
        Ok(ScopedCondition {
            registry: self.clone(),
            name: name.to_string(),
        })
    }

    /// Remove a condition, returning its entry
    pub fn unregister(&self, name: &str) -> Result<ConditionEntry, RegistryError> {
        let removed = self
            .write()
            .remove(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;

        tracing::debug!(condition = name, "unregistered condition");
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Option<ConditionEntry> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Current condition names, sorted
    pub fn list_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// `(value, label)` pairs for a choice field
    pub fn choices(&self) -> Vec<(String, String)> {
        self.read()
            .keys()
            .map(|name| (name.clone(), name.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl fmt::Debug for ConditionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionRegistry")
            .field("conditions", &self.list_names())
            .finish()
    }
}

/// Registration that is undone when dropped
#[must_use = "the condition is unregistered when this guard is dropped"]
pub struct ScopedCondition {
    registry: ConditionRegistry,
    name: String,
}

impl ScopedCondition {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ScopedCondition {
    fn drop(&mut self) {
        // Already removed by hand is fine
        let _ = self.registry.unregister(&self.name);
    }
}

// ============================================================================
// BUILT-IN CONDITIONS
// ============================================================================

fn insert_builtin(
    conditions: &mut BTreeMap<String, ConditionEntry>,
    name: &str,
    evaluator: Evaluator,
    validator: ValueValidator,
) {
    conditions.insert(
        name.to_string(),
        ConditionEntry {
            name: name.to_string(),
            evaluator,
            validator: Some(validator),
        },
    );
}

fn parse_bool(condition: &str, value: &str) -> Result<bool, ConditionError> {
    strtobool(value).ok_or_else(|| ConditionError::InvalidValue {
        condition: condition.to_string(),
        value: value.to_string(),
        reason: "not a boolean token".to_string(),
    })
}

fn boolean_condition(value: &str, _ctx: &FlagContext) -> Result<bool, ConditionError> {
    parse_bool("boolean", value)
}

fn user_condition(value: &str, ctx: &FlagContext) -> Result<bool, ConditionError> {
    let request = ctx.require_request("user")?;
    Ok(request.username.as_deref() == Some(value))
}

fn anonymous_condition(value: &str, ctx: &FlagContext) -> Result<bool, ConditionError> {
    let expected = parse_bool("anonymous", value)?;
    let request = ctx.require_request("anonymous")?;
    Ok(request.is_anonymous() == expected)
}

/// `name` means `name=True`
fn parameter_condition(value: &str, ctx: &FlagContext) -> Result<bool, ConditionError> {
    let request = ctx.require_request("parameter")?;
    let (param, expected) = value.split_once('=').unwrap_or((value, "True"));
    Ok(request.params.get(param).map(String::as_str) == Some(expected))
}

fn path_condition(value: &str, ctx: &FlagContext) -> Result<bool, ConditionError> {
    let request = ctx.require_request("path matches")?;
    let pattern = Regex::new(value).map_err(|e| ConditionError::InvalidValue {
        condition: "path matches".to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    Ok(pattern.is_match(&request.path))
}

fn date_value(condition: &str, value: &str) -> Result<DateTime<Utc>, ConditionError> {
    parse_date(value).ok_or_else(|| ConditionError::InvalidValue {
        condition: condition.to_string(),
        value: value.to_string(),
        reason: "not a date".to_string(),
    })
}

fn after_date_condition(value: &str, ctx: &FlagContext) -> Result<bool, ConditionError> {
    let date = date_value("after date", value)?;
    Ok(ctx.now() > date)
}

fn before_date_condition(value: &str, ctx: &FlagContext) -> Result<bool, ConditionError> {
    let date = date_value("before date", value)?;
    Ok(ctx.now() < date)
}

// ============================================================================
// TESTS
// ============================================================================
