//! Export daemon configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};
use crate::export::ExportEntry;
use crate::export_table::ExportTable;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_user_idle_timeout_secs() -> u64 {
    3600
}

/// Configuration file of `nfsplane-exportd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Exports published at startup
    #[serde(default)]
    pub exports: Vec<ExportEntry>,
    /// Seconds of inactivity before a user leaves the active list
    #[serde(default = "default_user_idle_timeout_secs")]
    pub user_idle_timeout_secs: u64,
}

impl ServerConfig {
    /// Reads a JSON configuration file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Checks every export and rejects duplicate keys.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.exports {
            entry.validate()?;
            if !seen.insert(entry.key()) {
                return Err(ExportError::AlreadyExists {
                    fs_id: entry.fs_id,
                    export_id: entry.export_id,
                });
            }
        }
        if self.user_idle_timeout_secs == 0 {
            return Err(ExportError::invalid("user_idle_timeout_secs must be positive"));
        }
        Ok(())
    }

    /// Publishes every configured export into `table`.
    pub fn apply(&self, table: &ExportTable) -> Result<usize> {
        self.validate()?;
        for entry in &self.exports {
            table.add(entry.clone())?;
        }
        Ok(self.exports.len())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            exports: vec![],
            user_idle_timeout_secs: default_user_idle_timeout_secs(),
        }
    }
}
