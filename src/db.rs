use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// A rule associating a flag with a condition and the value that
/// condition consumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagState {
    /// Stable identity (UUID)
    pub id: String,
    pub name: String,
    pub condition: String,
    pub value: String,
    /// Required conditions must all pass for the flag to be on
    #[serde(default)]
    pub required: bool,
    pub created_at: DateTime<Utc>,
}

impl FlagState {
    pub fn new(
        name: impl Into<String>,
        condition: impl Into<String>,
        value: impl Into<String>,
        required: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            condition: condition.into(),
            value: value.into(),
            required,
            created_at: Utc::now(),
        }
    }
}

/// Free-form key/value annotation on a flag (help text, owner, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagMetadata {
    pub id: String,
    pub name: String,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

impl FlagMetadata {
    pub fn new(name: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            key: key.into(),
            value: value.into(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome of an insert guarded by a uniqueness constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

// ============================================================================
// FLAG HISTORY
// ============================================================================

/// What happened to a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    StateAdded,
    StateRemoved,
    MetadataAdded,
    Enabled,
    Disabled,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::StateAdded => "state_added",
            ChangeKind::StateRemoved => "state_removed",
            ChangeKind::MetadataAdded => "metadata_added",
            ChangeKind::Enabled => "enabled",
            ChangeKind::Disabled => "disabled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "state_added" => Some(ChangeKind::StateAdded),
            "state_removed" => Some(ChangeKind::StateRemoved),
            "metadata_added" => Some(ChangeKind::MetadataAdded),
            "enabled" => Some(ChangeKind::Enabled),
            "disabled" => Some(ChangeKind::Disabled),
            _ => None,
        }
    }
}

/// One entry in a flag's change history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagChange {
    pub flag: String,
    pub kind: ChangeKind,
    /// Who made the change ("cli", "csv_importer", a form, ...)
    pub actor: String,
    pub details: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl FlagChange {
    fn record(flag: &str, kind: ChangeKind, actor: &str, details: serde_json::Value) -> Self {
        FlagChange {
            flag: flag.to_string(),
            kind,
            actor: actor.to_string(),
            details,
            recorded_at: Utc::now(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery (in-memory databases silently keep "memory")
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Flag States
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS flag_states (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            state_uuid TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            condition TEXT NOT NULL,
            value TEXT NOT NULL,
            required INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE (name, condition, value)
        )",
        [],
    )?;

    // ==========================================================================
    // Flag Metadata
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS flag_metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            metadata_uuid TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (name, key)
        )",
        [],
    )?;

    // ==========================================================================
    // Flag History (append-only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS flag_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            flag TEXT NOT NULL,
            kind TEXT NOT NULL,
            actor TEXT NOT NULL,
            details TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_flag_states_name ON flag_states(name)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_flag_metadata_name ON flag_metadata(name)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_flag_history_flag ON flag_history(flag)",
        [],
    )?;

    Ok(())
}

/// Run `work` atomically. Joins the caller's transaction when one is open.
pub fn in_transaction<T, F>(conn: &Connection, work: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    if !conn.is_autocommit() {
        return work(conn);
    }

    let tx = conn.unchecked_transaction()?;
    let value = work(&*tx)?;
    tx.commit()?;
    Ok(value)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

// ============================================================================
// FLAG STATES
// ============================================================================

fn write_flag_state(conn: &Connection, state: &FlagState) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO flag_states (state_uuid, name, condition, value, required, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            state.id,
            state.name,
            state.condition,
            state.value,
            state.required,
            state.created_at.to_rfc3339(),
        ],
    )
}

/// Insert a state and its history entry together
pub fn insert_flag_state(conn: &Connection, state: &FlagState, actor: &str) -> Result<InsertOutcome> {
    in_transaction(conn, |conn| {
        match write_flag_state(conn, state) {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => return Ok(InsertOutcome::Duplicate),
            Err(e) => return Err(e).context("Failed to insert flag state"),
        }

        record_change(
            conn,
            &FlagChange::record(
                &state.name,
                ChangeKind::StateAdded,
                actor,
                serde_json::json!({
                    "state_id": state.id,
                    "condition": state.condition,
                    "value": state.value,
                    "required": state.required,
                }),
            ),
        )?;

        tracing::debug!(flag = %state.name, condition = %state.condition, "saved flag state");
        Ok(InsertOutcome::Inserted)
    })
}

fn flag_state_from_row(row: &Row<'_>) -> rusqlite::Result<FlagState> {
    let created_at: String = row.get(5)?;

    Ok(FlagState {
        id: row.get(0)?,
        name: row.get(1)?,
        condition: row.get(2)?,
        value: row.get(3)?,
        required: row.get(4)?,
        created_at: parse_timestamp(5, &created_at)?,
    })
}

pub fn get_all_flag_states(conn: &Connection) -> Result<Vec<FlagState>> {
    let mut stmt = conn.prepare(
        "SELECT state_uuid, name, condition, value, required, created_at
         FROM flag_states
         ORDER BY name, id",
    )?;

    let states = stmt
        .query_map([], flag_state_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(states)
}

pub fn get_flag_states(conn: &Connection, name: &str) -> Result<Vec<FlagState>> {
    let mut stmt = conn.prepare(
        "SELECT state_uuid, name, condition, value, required, created_at
         FROM flag_states
         WHERE name = ?1
         ORDER BY id",
    )?;

    let states = stmt
        .query_map(params![name], flag_state_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(states)
}

pub fn count_flag_states(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM flag_states", [], |row| row.get(0))?;
    Ok(count)
}

/// Delete a state by id. Returns false when no such state exists.
pub fn delete_flag_state(conn: &Connection, id: &str, actor: &str) -> Result<bool> {
    in_transaction(conn, |conn| {
        let name: Option<String> = conn
            .query_row(
                "SELECT name FROM flag_states WHERE state_uuid = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(name) = name else {
            return Ok(false);
        };

        conn.execute("DELETE FROM flag_states WHERE state_uuid = ?1", params![id])?;
        record_change(
            conn,
            &FlagChange::record(&name, ChangeKind::StateRemoved, actor, serde_json::json!({ "state_id": id })),
        )?;

        Ok(true)
    })
}

/// Point the flag's `boolean` state at `enabled`, creating it if needed.
///
/// A flag ends up with exactly one boolean state. All-or-nothing.
pub fn set_boolean_state(conn: &Connection, name: &str, enabled: bool, actor: &str) -> Result<FlagState> {
    let value = if enabled { "True" } else { "False" };

    in_transaction(conn, |conn| {
        let existing: Vec<FlagState> = get_flag_states(conn, name)?
            .into_iter()
            .filter(|state| state.condition == "boolean")
            .collect();

        let state = match existing.split_first() {
            Some((first, rest)) => {
                for extra in rest {
                    conn.execute(
                        "DELETE FROM flag_states WHERE state_uuid = ?1",
                        params![extra.id],
                    )?;
                }
                conn.execute(
                    "UPDATE flag_states SET value = ?1 WHERE state_uuid = ?2",
                    params![value, first.id],
                )?;

                FlagState {
                    value: value.to_string(),
                    ..first.clone()
                }
            }
            None => {
                let state = FlagState::new(name, "boolean", value, false);
                write_flag_state(conn, &state)?;
                state
            }
        };

        let kind = if enabled { ChangeKind::Enabled } else { ChangeKind::Disabled };
        record_change(
            conn,
            &FlagChange::record(name, kind, actor, serde_json::json!({ "state_id": state.id, "value": value })),
        )?;

        Ok(state)
    })
}

// ============================================================================
// FLAG METADATA
// ============================================================================

pub fn insert_flag_metadata(conn: &Connection, metadata: &FlagMetadata, actor: &str) -> Result<InsertOutcome> {
    in_transaction(conn, |conn| {
        let result = conn.execute(
            "INSERT INTO flag_metadata (metadata_uuid, name, key, value, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                metadata.id,
                metadata.name,
                metadata.key,
                metadata.value,
                metadata.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => return Ok(InsertOutcome::Duplicate),
            Err(e) => return Err(e).context("Failed to insert flag metadata"),
        }

        record_change(
            conn,
            &FlagChange::record(
                &metadata.name,
                ChangeKind::MetadataAdded,
                actor,
                serde_json::json!({ "key": metadata.key, "value": metadata.value }),
            ),
        )?;

        tracing::debug!(flag = %metadata.name, key = %metadata.key, "saved flag metadata");
        Ok(InsertOutcome::Inserted)
    })
}

fn flag_metadata_from_row(row: &Row<'_>) -> rusqlite::Result<FlagMetadata> {
    let created_at: String = row.get(4)?;

    Ok(FlagMetadata {
        id: row.get(0)?,
        name: row.get(1)?,
        key: row.get(2)?,
        value: row.get(3)?,
        created_at: parse_timestamp(4, &created_at)?,
    })
}

pub fn get_all_flag_metadata(conn: &Connection) -> Result<Vec<FlagMetadata>> {
    let mut stmt = conn.prepare(
        "SELECT metadata_uuid, name, key, value, created_at
         FROM flag_metadata
         ORDER BY name, key",
    )?;

    let metadata = stmt
        .query_map([], flag_metadata_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(metadata)
}

pub fn get_flag_metadata(conn: &Connection, name: &str) -> Result<Vec<FlagMetadata>> {
    let mut stmt = conn.prepare(
        "SELECT metadata_uuid, name, key, value, created_at
         FROM flag_metadata
         WHERE name = ?1
         ORDER BY key",
    )?;

    let metadata = stmt
        .query_map(params![name], flag_metadata_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(metadata)
}

// ============================================================================
// FLAG HISTORY
// ============================================================================

fn record_change(conn: &Connection, change: &FlagChange) -> Result<()> {
    conn.execute(
        "INSERT INTO flag_history (flag, kind, actor, details, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            change.flag,
            change.kind.as_str(),
            change.actor,
            change.details.to_string(),
            change.recorded_at.to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to record {} for {}", change.kind.as_str(), change.flag))?;

    Ok(())
}

/// Changes to one flag, newest first
pub fn get_flag_history(conn: &Connection, flag: &str) -> Result<Vec<FlagChange>> {
    let mut stmt = conn.prepare(
        "SELECT flag, kind, actor, details, recorded_at
         FROM flag_history
         WHERE flag = ?1
         ORDER BY id DESC",
    )?;

    let rows = stmt
        .query_map(params![flag], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(flag, kind, actor, details, recorded_at)| -> Result<FlagChange> {
            Ok(FlagChange {
                kind: ChangeKind::parse(&kind).ok_or_else(|| anyhow!("Unknown change kind in history: {}", kind))?,
                details: serde_json::from_str(&details).context("Corrupt history details")?,
                recorded_at: parse_timestamp(4, &recorded_at)?,
                flag,
                actor,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    /// Makes every history write fail
    fn break_history(conn: &Connection) {
        conn.execute("DROP TABLE flag_history", []).unwrap();
    }

    #[test]
    fn test_insert_and_read_flag_state() {
        let conn = test_db();
        let state = FlagState::new("FLAG_ENABLED", "boolean", "True", false);

        let outcome = insert_flag_state(&conn, &state, "test").unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let states = get_flag_states(&conn, "FLAG_ENABLED").unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].id, state.id);
        assert_eq!(states[0].condition, "boolean");
        assert_eq!(states[0].value, "True");
        assert!(!states[0].required);
        assert_eq!(count_flag_states(&conn).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_flag_state_skipped() {
        let conn = test_db();

        let first = FlagState::new("FLAG_ENABLED", "boolean", "True", false);
        let second = FlagState::new("FLAG_ENABLED", "boolean", "True", true);

        assert_eq!(insert_flag_state(&conn, &first, "test").unwrap(), InsertOutcome::Inserted);
        assert_eq!(insert_flag_state(&conn, &second, "test").unwrap(), InsertOutcome::Duplicate);
        assert_eq!(count_flag_states(&conn).unwrap(), 1);
        assert_eq!(get_flag_history(&conn, "FLAG_ENABLED").unwrap().len(), 1);
    }

    #[test]
    fn test_failed_history_write_leaves_no_state() {
        let conn = test_db();
        break_history(&conn);

        let state = FlagState::new("F", "boolean", "True", false);
        assert!(insert_flag_state(&conn, &state, "test").is_err());
        assert_eq!(count_flag_states(&conn).unwrap(), 0);

        assert!(set_boolean_state(&conn, "G", true, "test").is_err());
        assert!(get_flag_states(&conn, "G").unwrap().is_empty());

        let metadata = FlagMetadata::new("F", "owner", "payments");
        assert!(insert_flag_metadata(&conn, &metadata, "test").is_err());
        assert!(get_flag_metadata(&conn, "F").unwrap().is_empty());
    }

    #[test]
    fn test_failed_toggle_keeps_previous_states() {
        let conn = test_db();
        insert_flag_state(&conn, &FlagState::new("F", "boolean", "True", false), "test").unwrap();
        insert_flag_state(&conn, &FlagState::new("F", "boolean", "on", false), "test").unwrap();
        break_history(&conn);

        assert!(set_boolean_state(&conn, "F", false, "test").is_err());

        let values: Vec<String> = get_flag_states(&conn, "F")
            .unwrap()
            .into_iter()
            .map(|s| s.value)
            .collect();
        assert_eq!(values, vec!["True", "on"]);
    }

    #[test]
    fn test_joins_open_transaction() {
        let conn = test_db();
        let tx = conn.unchecked_transaction().unwrap();

        insert_flag_state(&tx, &FlagState::new("F", "boolean", "True", false), "test").unwrap();
        drop(tx);

        // Rolled back with the outer transaction
        assert_eq!(count_flag_states(&conn).unwrap(), 0);
    }

    #[test]
    fn test_delete_flag_state() {
        let conn = test_db();
        let state = FlagState::new("FLAG_ENABLED", "boolean", "True", false);
        insert_flag_state(&conn, &state, "test").unwrap();

        assert!(delete_flag_state(&conn, &state.id, "test").unwrap());
        assert!(!delete_flag_state(&conn, &state.id, "test").unwrap());
        assert!(get_all_flag_states(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_set_boolean_state_creates_then_updates() {
        let conn = test_db();

        let created = set_boolean_state(&conn, "NEW_FLAG", true, "test").unwrap();
        assert_eq!(created.value, "True");

        let updated = set_boolean_state(&conn, "NEW_FLAG", false, "test").unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.value, "False");

        let states = get_flag_states(&conn, "NEW_FLAG").unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].value, "False");
    }

    #[test]
    fn test_set_boolean_state_collapses_duplicates() {
        let conn = test_db();
        insert_flag_state(&conn, &FlagState::new("F", "boolean", "True", false), "test").unwrap();
        insert_flag_state(&conn, &FlagState::new("F", "boolean", "False", false), "test").unwrap();
        insert_flag_state(&conn, &FlagState::new("F", "user", "alice", false), "test").unwrap();

        set_boolean_state(&conn, "F", true, "test").unwrap();

        let states = get_flag_states(&conn, "F").unwrap();
        let booleans: Vec<_> = states.iter().filter(|s| s.condition == "boolean").collect();
        assert_eq!(booleans.len(), 1);
        assert_eq!(booleans[0].value, "True");
        assert_eq!(states.len(), 2);
    }

    #[test]
    fn test_flag_metadata_unique_per_key() {
        let conn = test_db();
        let help = FlagMetadata::new("FLAG_ENABLED", "help_text", "enable a cool thing");
        let again = FlagMetadata::new("FLAG_ENABLED", "help_text", "something else");
        let owner = FlagMetadata::new("FLAG_ENABLED", "owner", "payments");

        assert_eq!(insert_flag_metadata(&conn, &help, "test").unwrap(), InsertOutcome::Inserted);
        assert_eq!(insert_flag_metadata(&conn, &again, "test").unwrap(), InsertOutcome::Duplicate);
        assert_eq!(insert_flag_metadata(&conn, &owner, "test").unwrap(), InsertOutcome::Inserted);

        let metadata = get_flag_metadata(&conn, "FLAG_ENABLED").unwrap();
        let keys: Vec<&str> = metadata.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["help_text", "owner"]);
        assert_eq!(metadata[0].value, "enable a cool thing");
        assert_eq!(get_all_flag_metadata(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_flag_history_newest_first() {
        let conn = test_db();

        let state = FlagState::new("FLAG_ENABLED", "boolean", "True", false);
        insert_flag_state(&conn, &state, "tester").unwrap();
        set_boolean_state(&conn, "FLAG_ENABLED", false, "cli").unwrap();
        delete_flag_state(&conn, &state.id, "cli").unwrap();

        let history = get_flag_history(&conn, "FLAG_ENABLED").unwrap();
        let kinds: Vec<ChangeKind> = history.iter().map(|c| c.kind).collect();

        assert_eq!(
            kinds,
            vec![ChangeKind::StateRemoved, ChangeKind::Disabled, ChangeKind::StateAdded]
        );
        assert_eq!(history[2].actor, "tester");
        assert_eq!(history[2].details["condition"], "boolean");
        assert_eq!(history[1].details["value"], "False");
        assert!(get_flag_history(&conn, "OTHER").unwrap().is_empty());
    }
}
