//! # Engine Configuration
//!
//! Configuration for the status engine and its database.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MEATBOX_DB_PATH=/srv/meatbox/meatbox.db                            │
//! │     MEATBOX_SYSTEM_ACTOR=system                                        │
//! │     MEATBOX_MAX_WRITE_ATTEMPTS=5                                       │
//! │     MEATBOX_CLOSURE_ENABLED=false                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/meatbox-admin/engine.toml (Linux)                        │
//! │     ~/Library/Application Support/com.meatbox.admin/engine.toml        │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [engine]
//! system_actor_id = "system"
//! max_write_attempts = 3
//! closure_enabled = true
//!
//! [database]
//! path = "meatbox.db"
//! max_connections = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use meatbox_db::DbConfig;

use crate::error::{StatusError, StatusResult};

// =============================================================================
// Engine Settings
// =============================================================================

/// Behaviour of the status engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Actor recorded in the audit log for automatic transitions
    /// (closure, payment intake, repair).
    #[serde(default = "default_system_actor")]
    pub system_actor_id: String,

    /// How many times a status write is attempted when another writer
    /// bumps the version between our read and our write.
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,

    /// Run the closure evaluator after purchase changes.
    #[serde(default = "default_true")]
    pub closure_enabled: bool,
}

fn default_system_actor() -> String {
    "system".to_string()
}

fn default_max_write_attempts() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            system_actor_id: default_system_actor(),
            max_write_attempts: default_max_write_attempts(),
            closure_enabled: true,
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Where the SQLite file lives and how many connections to open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("meatbox.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl EngineConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> StatusResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> StatusResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| StatusError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> StatusResult<()> {
        if self.engine.system_actor_id.trim().is_empty() {
            return Err(StatusError::InvalidConfig(
                "system_actor_id must not be empty".into(),
            ));
        }

        if self.engine.max_write_attempts == 0 {
            return Err(StatusError::InvalidConfig(
                "max_write_attempts must be greater than 0".into(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(StatusError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("MEATBOX_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(actor) = std::env::var("MEATBOX_SYSTEM_ACTOR") {
            self.engine.system_actor_id = actor;
        }

        if let Ok(attempts) = std::env::var("MEATBOX_MAX_WRITE_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(n) => self.engine.max_write_attempts = n,
                Err(_) => warn!(value = %attempts, "Ignoring invalid MEATBOX_MAX_WRITE_ATTEMPTS"),
            }
        }

        if let Ok(enabled) = std::env::var("MEATBOX_CLOSURE_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.engine.closure_enabled = true,
                "0" | "false" | "no" | "off" => self.engine.closure_enabled = false,
                _ => warn!(value = %enabled, "Unknown value for MEATBOX_CLOSURE_ENABLED"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "meatbox", "admin")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Pool configuration for [`meatbox_db::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
    }

    pub fn system_actor(&self) -> &str {
        &self.engine.system_actor_id
    }
}
