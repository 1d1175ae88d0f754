//! Configuration system for annal.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AnnalError, AnnalResult};

/// Audit engine configuration.
///
/// The persisted layout (three tables) is an implementation detail of the
/// SQLite store; only the names are configurable, so several engines can
/// share one database file without colliding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Path to the audit database.
    pub db_path: PathBuf,
    /// Table holding revision metadata.
    pub revision_table: String,
    /// Table holding per-entity audit rows.
    pub entity_table: String,
    /// Table holding collection membership events.
    pub collection_table: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        let annal_dir = dirs::home_dir()
            .map(|h| h.join(".annal"))
            .unwrap_or_else(|| PathBuf::from(".annal"));

        Self {
            db_path: annal_dir.join("annals.db"),
            revision_table: "revisions".to_string(),
            entity_table: "entity_audit".to_string(),
            collection_table: "collection_audit".to_string(),
        }
    }
}

impl AuditConfig {
    /// Configuration backed by an in-memory database (for testing).
    pub fn in_memory() -> Self {
        Self {
            db_path: PathBuf::from(":memory:"),
            ..Default::default()
        }
    }

    /// Configuration backed by the given database file.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: path.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<std::path::Path>) -> AnnalResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| AnnalError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| AnnalError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| AnnalError::Configuration(e.to_string()))?,
            _ => {
                return Err(AnnalError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// `ANNAL_DB_PATH` overrides the database path; `ANNAL_TABLE_PREFIX`
    /// prepends a prefix to the three default table names.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ANNAL_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(prefix) = std::env::var("ANNAL_TABLE_PREFIX") {
            config.revision_table = format!("{prefix}revisions");
            config.entity_table = format!("{prefix}entity_audit");
            config.collection_table = format!("{prefix}collection_audit");
        }

        config
    }

    /// Check that table names are plain identifiers. They are interpolated
    /// into SQL, so anything else is rejected up front.
    pub fn validate(&self) -> AnnalResult<()> {
        for name in [
            &self.revision_table,
            &self.entity_table,
            &self.collection_table,
        ] {
            if !is_plain_identifier(name) {
                return Err(AnnalError::Configuration(format!(
                    "table name '{name}' is not a plain identifier"
                )));
            }
        }
        Ok(())
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
