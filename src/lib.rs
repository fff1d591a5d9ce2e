// Feature Flags - Core Library
// Exposes all modules for use in the CLI and tests

pub mod validation;     // Value validators and boolean tokens
pub mod conditions;     // Condition Registry + built-in conditions
pub mod db;             // SQLite store + flag history
pub mod forms;          // Flag state / flag metadata forms
pub mod flags;          // Flag aggregation and evaluation
pub mod import;         // CSV bulk import
pub mod config;

// Re-export commonly used types
pub use validation::{
    strtobool, validate_boolean, parse_date,
    BOOLEAN_MESSAGE, REQUIRED_MESSAGE,
};
pub use conditions::{
    ConditionEntry, ConditionError, ConditionRegistry, FlagContext,
    RegistryError, RequestInfo, ScopedCondition,
};
pub use db::{
    FlagState, FlagMetadata, ChangeKind, FlagChange, InsertOutcome,
    setup_database, in_transaction, insert_flag_state, insert_flag_metadata,
    get_all_flag_states, get_flag_states, get_all_flag_metadata, get_flag_metadata,
    delete_flag_state, set_boolean_state, count_flag_states, get_flag_history,
};
pub use forms::{
    form_data, FieldDefinition, FieldErrors, FieldKind, FormData, FormError,
    FlagMetadataForm, FlagStateForm, NON_FIELD_ERRORS,
};
pub use flags::{
    Flag, FlagCondition, FlagSet, FlagSettings, StateSource,
    enable_flag, disable_flag,
};
pub use import::{import_flag_states_csv, ImportReport, RejectedRow};
pub use config::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
