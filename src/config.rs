// ⚙️ Configuration - where the store lives, where flag settings come from
// Defaults here; FLAGS_* variables and command-line options arrive through clap

use crate::db::setup_database;
use crate::flags::FlagSettings;
use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite file holding flag states, metadata and history
    pub database_path: PathBuf,

    /// Optional JSON file declaring flags
    pub settings_path: Option<PathBuf>,

    /// `tracing_subscriber::EnvFilter` directive
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("flags.db"),
            settings_path: None,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Builder: override the database path
    pub fn with_database(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.database_path = path;
        }
        self
    }

    /// Builder: override the settings file
    pub fn with_settings(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.settings_path = path;
        }
        self
    }

    /// Builder: override the log filter
    pub fn with_log_filter(mut self, filter: Option<String>) -> Self {
        if let Some(filter) = filter {
            self.log_filter = filter;
        }
        self
    }

    /// Flags declared in the settings file, or none
    pub fn load_settings(&self) -> Result<FlagSettings> {
        match &self.settings_path {
            Some(path) => FlagSettings::from_file(path),
            None => Ok(FlagSettings::new()),
        }
    }

    /// Open the store and make sure its tables exist
    pub fn open_database(&self) -> Result<Connection> {
        let conn = Connection::open(&self.database_path)
            .with_context(|| format!("Failed to open database: {:?}", self.database_path))?;
        setup_database(&conn)?;
        Ok(conn)
    }
}
