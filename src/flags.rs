// 🚩 Flags - conditions gathered per flag name, checked against a context
// Sources: flags declared in a settings file, then states saved in the store

use crate::conditions::{ConditionError, ConditionRegistry, FlagContext};
use crate::db::{get_all_flag_metadata, get_all_flag_states, set_boolean_state, FlagState};
use anyhow::{Context as AnyhowContext, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// ============================================================================
// SETTINGS
// ============================================================================

/// A condition value as written in settings: `"on"`, `true` or `3`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Text(String),
    Bool(bool),
    Number(serde_json::Number),
}

impl SettingValue {
    pub fn as_value_string(&self) -> String {
        match self {
            SettingValue::Text(text) => text.clone(),
            SettingValue::Bool(true) => "True".to_string(),
            SettingValue::Bool(false) => "False".to_string(),
            SettingValue::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsCondition {
    pub condition: String,
    pub value: SettingValue,
    #[serde(default)]
    pub required: bool,
}

/// Flags declared in configuration:
/// `{ "FLAG_NAME": [ { "condition": "boolean", "value": true } ] }`
///
/// A flag may be declared with no conditions; it exists but is off.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagSettings {
    pub flags: BTreeMap<String, Vec<SettingsCondition>>,
}

impl FlagSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read flag settings: {:?}", path.as_ref()))?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse flag settings JSON")
    }

    /// Builder: declare a condition for a flag
    pub fn with_condition(
        mut self,
        flag: &str,
        condition: &str,
        value: impl Into<String>,
        required: bool,
    ) -> Self {
        self.flags
            .entry(flag.to_string())
            .or_default()
            .push(SettingsCondition {
                condition: condition.to_string(),
                value: SettingValue::Text(value.into()),
                required,
            });
        self
    }
}

// ============================================================================
// FLAG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StateSource {
    Settings,
    Database,
}

impl StateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateSource::Settings => "settings",
            StateSource::Database => "database",
        }
    }
}

/// One condition attached to a flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlagCondition {
    pub condition: String,
    pub value: String,
    pub required: bool,
    pub source: StateSource,
}

impl FlagCondition {
    pub fn new(condition: impl Into<String>, value: impl Into<String>, required: bool, source: StateSource) -> Self {
        FlagCondition {
            condition: condition.into(),
            value: value.into(),
            required,
            source,
        }
    }

    /// Evaluate against the registry. Unknown conditions are never met.
    pub fn check(&self, registry: &ConditionRegistry, ctx: &FlagContext) -> Result<bool, ConditionError> {
        match registry.get(&self.condition) {
            Some(entry) => entry.evaluate(&self.value, ctx),
            None => {
                tracing::warn!(condition = %self.condition, "unknown condition, treating as not met");
                Ok(false)
            }
        }
    }
}

impl From<&FlagState> for FlagCondition {
    fn from(state: &FlagState) -> Self {
        FlagCondition::new(
            state.condition.clone(),
            state.value.clone(),
            state.required,
            StateSource::Database,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flag {
    pub name: String,
    pub conditions: Vec<FlagCondition>,
    pub metadata: BTreeMap<String, String>,
}

impl Flag {
    pub fn new(name: impl Into<String>) -> Self {
        Flag {
            name: name.into(),
            conditions: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builder: add condition
    pub fn with_condition(mut self, condition: FlagCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Whether the flag is on for this context.
    ///
    /// Off with no conditions. Any failing required condition turns it off.
    /// With only required conditions, all passing turns it on; otherwise at
    /// least one non-required condition must pass.
    pub fn check_state(&self, registry: &ConditionRegistry, ctx: &FlagContext) -> Result<bool, ConditionError> {
        if self.conditions.is_empty() {
            return Ok(false);
        }

        let (required, optional): (Vec<&FlagCondition>, Vec<&FlagCondition>) =
            self.conditions.iter().partition(|c| c.required);

        for condition in &required {
            if !condition.check(registry, ctx)? {
                return Ok(false);
            }
        }

        if optional.is_empty() {
            return Ok(true);
        }

        for condition in &optional {
            if condition.check(registry, ctx)? {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

// ============================================================================
// FLAG SET
// ============================================================================

/// All known flags, settings first and stored states after
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    flags: BTreeMap<String, Flag>,
}

impl FlagSet {
    pub fn from_settings(settings: &FlagSettings) -> Self {
        let mut set = FlagSet::default();

        for (name, conditions) in &settings.flags {
            let flag = set.entry(name);
            for c in conditions {
                flag.conditions.push(FlagCondition::new(
                    c.condition.clone(),
                    c.value.as_value_string(),
                    c.required,
                    StateSource::Settings,
                ));
            }
        }

        set
    }

    /// Settings plus every state and metadata record in the store
    pub fn load(settings: &FlagSettings, conn: &Connection) -> Result<Self> {
        let mut set = Self::from_settings(settings);

        for state in get_all_flag_states(conn)? {
            set.entry(&state.name).conditions.push(FlagCondition::from(&state));
        }

        for metadata in get_all_flag_metadata(conn)? {
            set.entry(&metadata.name)
                .metadata
                .insert(metadata.key, metadata.value);
        }

        tracing::debug!(flags = set.len(), "loaded flags");
        Ok(set)
    }

    fn entry(&mut self, name: &str) -> &mut Flag {
        self.flags
            .entry(name.to_string())
            .or_insert_with(|| Flag::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&Flag> {
        self.flags.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.flags.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.flags.values()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// `None` when no flag has this name
    pub fn state(&self, name: &str, registry: &ConditionRegistry, ctx: &FlagContext) -> Result<Option<bool>, ConditionError> {
        self.get(name)
            .map(|flag| flag.check_state(registry, ctx))
            .transpose()
    }

    /// Unknown flags are disabled
    pub fn enabled(&self, name: &str, registry: &ConditionRegistry, ctx: &FlagContext) -> Result<bool, ConditionError> {
        Ok(self.state(name, registry, ctx)? == Some(true))
    }

    pub fn disabled(&self, name: &str, registry: &ConditionRegistry, ctx: &FlagContext) -> Result<bool, ConditionError> {
        Ok(!self.enabled(name, registry, ctx)?)
    }
}

// ============================================================================
// ENABLE / DISABLE
// ============================================================================

/// Turn a flag on through its stored `boolean` state
pub fn enable_flag(conn: &Connection, name: &str, actor: &str) -> Result<FlagState> {
    let state = set_boolean_state(conn, name, true, actor)?;
    tracing::info!(flag = name, actor, "flag enabled");
    Ok(state)
}

/// Turn a flag off through its stored `boolean` state.
///
/// Other conditions on the flag may still enable it.
pub fn disable_flag(conn: &Connection, name: &str, actor: &str) -> Result<FlagState> {
    let state = set_boolean_state(conn, name, false, actor)?;
    tracing::info!(flag = name, actor, "flag disabled");
    Ok(state)
}

// ============================================================================
// TESTS
// ============================================================================
