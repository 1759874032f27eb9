//! # Validation Module
//!
//! Input validation for box creation and purchase intake.
//!
//! ## Purchase Quantity Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Buyer enters kg                                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate_purchase_quantity(box, kg) ← THIS MODULE                      │
//! │       │                                                                 │
//! │       ├── box deleted or not waiting_purchases? → BoxClosed             │
//! │       ├── kg <= 0?                              → MustBePositive        │
//! │       ├── kg > remaining_kg?                    → InsufficientVolume    │
//! │       ├── remaining >= min and kg < min?        → BelowMinimum          │
//! │       │                                                                 │
//! │       └── OK → register_purchase                                        │
//! │                                                                         │
//! │  The final remainder of a box may be bought below the minimum.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::status::Lifecycle;
use crate::types::{MeatBox, NewBox};
use crate::MAX_NAME_LEN;

/// Result type for field-level validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Field Validators
// =============================================================================

fn validate_text(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

/// Validates an actor id used for audit attribution.
///
/// ```rust
/// use meatbox_core::validation::validate_actor_id;
///
/// assert!(validate_actor_id("admin-42").is_ok());
/// assert!(validate_actor_id("  ").is_err());
/// ```
pub fn validate_actor_id(actor_id: &str) -> ValidationResult<()> {
    if actor_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "actor_id".to_string(),
        });
    }
    Ok(())
}

/// Validates the fields of a box before insert.
///
/// ## Rules
/// - `name` and `brand` are required, at most 200 characters
/// - `total_kg` must be positive
/// - prices and the per-buyer minimum must not be negative
/// - the minimum must not exceed the total volume
pub fn validate_new_box(input: &NewBox) -> ValidationResult<()> {
    validate_text("name", &input.name)?;
    validate_text("brand", &input.brand)?;

    if input.total_kg <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "total_kg".to_string(),
        });
    }

    for (field, value) in [
        ("price_per_kg", input.price_per_kg_cents),
        ("cost_per_kg", input.cost_per_kg_cents),
        ("min_kg_per_person", input.min_kg_per_person),
    ] {
        if value < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: field.to_string(),
            });
        }
    }

    if input.min_kg_per_person > input.total_kg {
        return Err(ValidationError::NotAllowed {
            field: "min_kg_per_person".to_string(),
            allowed: vec![format!("0..={}", input.total_kg)],
        });
    }

    Ok(())
}

// =============================================================================
// Purchase Quantity
// =============================================================================

/// Validates a requested quantity against the current state of a box.
///
/// ## Example
/// ```rust,ignore
/// // 10 kg box, 3 kg left, minimum 5 kg: the remainder may be bought.
/// assert!(validate_purchase_quantity(&meat_box, 3).is_ok());
/// ```
pub fn validate_purchase_quantity(meat_box: &MeatBox, kg: i64) -> CoreResult<()> {
    if meat_box.is_deleted() || !meat_box.status.accepts_purchases() {
        return Err(CoreError::BoxClosed {
            box_id: meat_box.id.clone(),
            status: meat_box.status.label().to_string(),
        });
    }

    if kg <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "kg".to_string(),
        }
        .into());
    }

    if kg > meat_box.remaining_kg {
        return Err(CoreError::InsufficientVolume {
            box_id: meat_box.id.clone(),
            available: meat_box.remaining_kg,
            requested: kg,
        });
    }

    let minimum = meat_box.min_kg_per_person;
    if minimum > 0 && meat_box.remaining_kg >= minimum && kg < minimum {
        return Err(CoreError::BelowMinimum {
            minimum,
            requested: kg,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
