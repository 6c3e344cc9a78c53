//! Store configuration
//!
//! The database location is an explicit value handed to [`crate::Mailstore::open`],
//! never a process-wide global, so tests and multi-tenant deployments can run
//! isolated instances side by side.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default database path relative to the working directory
const DEFAULT_DB_PATH: &str = "data/swiftpost.db";

/// Configuration for opening a [`crate::Mailstore`]
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file. Parent directories are created on open.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl StoreConfig {
    /// Create a config pointing at an explicit database file
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", path))
    }
}
