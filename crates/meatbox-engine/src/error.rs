//! # Status Error Types
//!
//! The outcome type the engine hands to the admin UI.
//!
//! ## Error Kinds
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Status Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Transition    │  │     Lookup      │  │     Propagation         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Invalid        │  │  EntityNotFound │  │  PropagationFailure     │ │
//! │  │  InProgress     │  │                 │  │  (reported, never       │ │
//! │  │  Conflict       │  │                 │  │   rolled back)          │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Storage      │  │   Validation    │  │      Config             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  DbError        │  │  purchase qty   │  │  load / save / invalid  │ │
//! │  │  (not conflict) │  │  dispatch step  │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant maps to one [`ErrorKind`], the machine-readable tag the UI
//! switches on. The `Display` text is the human-readable message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use meatbox_core::{CoreError, EntityType, ValidationError};
use meatbox_db::DbError;

/// Result type alias for engine operations.
pub type StatusResult<T> = Result<T, StatusError>;

/// Machine-readable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidTransition,
    EntityNotFound,
    TransitionInProgress,
    PropagationFailure,
    Conflict,
    Storage,
    Validation,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::EntityNotFound => "entity_not_found",
            ErrorKind::TransitionInProgress => "transition_in_progress",
            ErrorKind::PropagationFailure => "propagation_failure",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Storage => "storage",
            ErrorKind::Validation => "validation",
            ErrorKind::Config => "config",
        };
        f.write_str(s)
    }
}

/// Engine error covering every way a status operation can fail.
#[derive(Debug, Error)]
pub enum StatusError {
    // =========================================================================
    // Transition Errors
    // =========================================================================
    /// Requested edge is not allowed. `allowed` drives the forced-override
    /// prompt in the UI.
    #[error("Invalid {entity} transition: {from} -> {to} (allowed: {})", allowed.join(", "))]
    InvalidTransition {
        entity: EntityType,
        from: String,
        to: String,
        allowed: Vec<String>,
    },

    /// The same `(entity, id, next)` transition is already in flight.
    #[error("{entity} {id} is already moving to {next}")]
    TransitionInProgress {
        entity: EntityType,
        id: String,
        next: String,
    },

    /// Every write attempt lost the optimistic version check.
    #[error("{entity} {id} kept changing underneath us ({attempts} attempts)")]
    Conflict {
        entity: EntityType,
        id: String,
        attempts: u32,
    },

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    /// Box or purchase id does not resolve.
    #[error("{entity} not found: {id}")]
    EntityNotFound { entity: EntityType, id: String },

    // =========================================================================
    // Propagation Errors
    // =========================================================================
    /// A propagated update failed after the triggering transition committed.
    #[error("Propagation to {entity} {id} failed: {message}")]
    PropagationFailure {
        entity: EntityType,
        id: String,
        message: String,
    },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Database operation failed.
    #[error("Storage error: {0}")]
    Storage(DbError),

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// Domain rule or input validation failed.
    #[error(transparent)]
    Validation(CoreError),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),
}

impl StatusError {
    /// Creates an EntityNotFound error.
    pub fn not_found(entity: EntityType, id: impl Into<String>) -> Self {
        StatusError::EntityNotFound {
            entity,
            id: id.into(),
        }
    }

    /// The machine-readable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StatusError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            StatusError::TransitionInProgress { .. } => ErrorKind::TransitionInProgress,
            StatusError::Conflict { .. } => ErrorKind::Conflict,
            StatusError::EntityNotFound { .. } => ErrorKind::EntityNotFound,
            StatusError::PropagationFailure { .. } => ErrorKind::PropagationFailure,
            StatusError::Storage(_) => ErrorKind::Storage,
            StatusError::Validation(_) => ErrorKind::Validation,
            StatusError::InvalidConfig(_)
            | StatusError::ConfigLoadFailed(_)
            | StatusError::ConfigSaveFailed(_) => ErrorKind::Config,
        }
    }

    /// A guard hit is a no-op, not a failure worth showing to an operator.
    pub fn is_benign(&self) -> bool {
        matches!(self, StatusError::TransitionInProgress { .. })
    }

    /// Returns true if re-running the same call may succeed.
    ///
    /// ## Retryable Errors
    /// - Lost optimistic writes
    /// - Pool exhaustion
    ///
    /// ## Non-Retryable Errors
    /// - Invalid transitions and validation failures
    /// - Missing entities
    pub fn is_retryable(&self) -> bool {
        match self {
            StatusError::Conflict { .. } => true,
            StatusError::Storage(db) => db.is_retryable(),
            _ => false,
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for StatusError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidTransition {
                entity,
                from,
                to,
                allowed,
            } => StatusError::InvalidTransition {
                entity,
                from,
                to,
                allowed,
            },
            CoreError::EntityNotFound { entity, id } => StatusError::EntityNotFound { entity, id },
            other => StatusError::Validation(other),
        }
    }
}

impl From<ValidationError> for StatusError {
    fn from(err: ValidationError) -> Self {
        StatusError::Validation(CoreError::Validation(err))
    }
}

impl From<DbError> for StatusError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => match entity.as_str() {
                "box" => StatusError::not_found(EntityType::Box, id),
                "purchase" | "order" => StatusError::not_found(EntityType::Order, id),
                _ => StatusError::Storage(DbError::NotFound { entity, id }),
            },
            other => StatusError::Storage(other),
        }
    }
}

impl From<std::io::Error> for StatusError {
    fn from(err: std::io::Error) -> Self {
        StatusError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for StatusError {
    fn from(err: toml::de::Error) -> Self {
        StatusError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for StatusError {
    fn from(err: toml::ser::Error) -> Self {
        StatusError::ConfigSaveFailed(err.to_string())
    }
}
