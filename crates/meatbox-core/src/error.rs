//! # Error Types
//!
//! Domain-specific error types for meatbox-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  meatbox-core errors (this file)                                       │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  meatbox-db errors (separate crate)                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  meatbox-engine errors                                                 │
//! │  └── StatusError      - What the admin UI sees (machine-readable kind) │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → StatusError → UI                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::EntityType;

// =============================================================================
// Core Error
// =============================================================================

/// Core business rule errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Requested status edge is not allowed.
    ///
    /// ## When This Occurs
    /// - Edge is not in the static graph and the caller did not force it
    /// - A box is moved into `dispatching` or `completed` without force
    ///
    /// `allowed` carries the valid next codes so the UI can offer a forced
    /// override with a reason.
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: EntityType,
        from: String,
        to: String,
        allowed: Vec<String>,
    },

    /// Box or purchase id does not resolve.
    #[error("{entity} not found: {id}")]
    EntityNotFound { entity: EntityType, id: String },

    /// Box is not accepting purchases (closed, cancelled or deleted).
    #[error("Box {box_id} is not accepting purchases ({status})")]
    BoxClosed { box_id: String, status: String },

    /// Requested quantity exceeds what is left in the box.
    ///
    /// ## User Workflow
    /// ```text
    /// Buyer enters 8 kg
    ///      │
    ///      ▼
    /// Box has 5 kg left
    ///      │
    ///      ▼
    /// InsufficientVolume { available: 5, requested: 8 }
    ///      │
    ///      ▼
    /// UI shows: "Máximo disponível: 5kg"
    /// ```
    #[error("Only {available} kg left in box {box_id}, requested {requested} kg")]
    InsufficientVolume {
        box_id: String,
        available: i64,
        requested: i64,
    },

    /// Quantity is below the per-buyer minimum while enough volume remains.
    #[error("Minimum purchase is {minimum} kg, requested {requested} kg")]
    BelowMinimum { minimum: i64, requested: i64 },

    /// Dispatch checklist step attempted out of order.
    #[error("Dispatch step rejected for order {order_id}: {reason}")]
    DispatchStep { order_id: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an EntityNotFound error.
    pub fn not_found(entity: EntityType, id: impl Into<String>) -> Self {
        CoreError::EntityNotFound {
            entity,
            id: id.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
