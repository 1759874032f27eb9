//! # Domain Types
//!
//! Core domain types used throughout Meatbox.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    MeatBox      │◄──│    Purchase     │   │ StatusLogEntry  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  entity_type    │       │
//! │  │  total_kg       │   │  order_number   │   │  entity_id      │       │
//! │  │  remaining_kg   │   │  box_id (ref)   │   │  previous/next  │       │
//! │  │  payment_type   │   │  kg_purchased   │   │  forced         │       │
//! │  │  status         │   │  status         │   │  reason?        │       │
//! │  │  version        │   │  payment_status │   │  performed_by   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A purchase holds a back-reference to its box, never ownership. Both
//! aggregates carry a `version` used for optimistic single-document writes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::status::{BoxStatus, OrderStatus};

// =============================================================================
// Entity Type
// =============================================================================

/// The two aggregates whose status the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Box,
    Order,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Box => f.write_str("box"),
            EntityType::Order => f.write_str("order"),
        }
    }
}

// =============================================================================
// Payment Type / Status
// =============================================================================

/// When buyers pay for a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    /// Paid at purchase time through a payment link.
    Prepaid,
    /// Paid after delivery. Purchases are recorded as paid on creation.
    Postpaid,
}

/// Payment state of a single purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Pending
    }
}

// =============================================================================
// Meat Box
// =============================================================================

/// One bulk-purchase campaign for a product batch.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MeatBox {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Product name shown in the storefront.
    pub name: String,

    /// Brand / supplier of the meat.
    pub brand: String,

    /// Price per kg charged to buyers, in centavos.
    pub price_per_kg_cents: i64,

    /// Cost per kg paid to the supplier, in centavos. Admin only.
    pub cost_per_kg_cents: i64,

    /// Total volume of the box.
    pub total_kg: i64,

    /// `max(0, total_kg − Σ kg over non-cancelled purchases)`.
    pub remaining_kg: i64,

    /// Minimum kg per buyer (0 for no minimum).
    pub min_kg_per_person: i64,

    pub payment_type: PaymentType,

    /// Written only by the status engine.
    pub status: BoxStatus,

    /// Soft-delete marker.
    #[ts(as = "Option<String>")]
    pub deleted_at: Option<DateTime<Utc>>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
}

impl MeatBox {
    /// Builds a new box from validated input: initial status, full volume
    /// available, version 0. Names are trimmed.
    pub fn from_new(id: impl Into<String>, input: &NewBox, now: DateTime<Utc>) -> Self {
        MeatBox {
            id: id.into(),
            name: input.name.trim().to_string(),
            brand: input.brand.trim().to_string(),
            price_per_kg_cents: input.price_per_kg_cents,
            cost_per_kg_cents: input.cost_per_kg_cents,
            total_kg: input.total_kg,
            remaining_kg: input.total_kg,
            min_kg_per_person: input.min_kg_per_person,
            payment_type: input.payment_type,
            status: BoxStatus::initial(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Returns the per-kg price as Money.
    #[inline]
    pub fn price_per_kg(&self) -> Money {
        Money::from_cents(self.price_per_kg_cents)
    }

    /// Returns true if the box was soft-deleted.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns true if buyers can still reserve volume in this box.
    pub fn is_open_for_purchases(&self) -> bool {
        !self.is_deleted() && self.status.accepts_purchases() && self.remaining_kg > 0
    }
}

/// Input for creating a box. Status, remaining volume and timestamps are
/// derived.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewBox {
    pub name: String,
    pub brand: String,
    pub price_per_kg_cents: i64,
    pub cost_per_kg_cents: i64,
    pub total_kg: i64,
    pub min_kg_per_person: i64,
    pub payment_type: PaymentType,
}

/// Patch of the non-status fields of a box. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BoxUpdate {
    pub name: Option<String>,
    pub brand: Option<String>,
    pub price_per_kg_cents: Option<i64>,
    pub cost_per_kg_cents: Option<i64>,
    pub total_kg: Option<i64>,
    pub min_kg_per_person: Option<i64>,
}

// =============================================================================
// Purchase
// =============================================================================

/// Manual dispatch checklist of one order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DispatchSteps {
    /// The order was separated in the warehouse.
    pub order_separated: bool,

    #[ts(as = "Option<String>")]
    pub separated_at: Option<DateTime<Utc>>,

    /// A courier picked the order up.
    pub picked_up_by_courier: bool,

    #[ts(as = "Option<String>")]
    pub picked_up_at: Option<DateTime<Utc>>,
}

/// One buyer's commitment against a box.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Purchase {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Human-readable order number, e.g. `GM12345678`.
    pub order_number: String,

    /// Back-reference to the owning box.
    pub box_id: String,

    /// Buyer.
    pub user_id: String,

    pub kg_purchased: i64,

    /// `price_per_kg × kg_purchased` at purchase time, in centavos.
    pub total_amount_cents: i64,

    /// Written only by the status engine.
    pub status: OrderStatus,

    pub payment_status: PaymentStatus,

    /// Checkout link issued by the payment provider (prepaid only).
    pub payment_link: Option<String>,

    #[ts(as = "Option<String>")]
    pub payment_expires_at: Option<DateTime<Utc>>,

    pub dispatch: DispatchSteps,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
}

impl Purchase {
    /// Builds an order number: `GM` followed by the last 8 digits of a
    /// millisecond timestamp.
    ///
    /// ```rust
    /// use meatbox_core::types::Purchase;
    ///
    /// assert_eq!(Purchase::order_number_for(1_718_000_123_456), "GM00123456");
    /// ```
    pub fn order_number_for(timestamp_millis: i64) -> String {
        format!(
            "{}{:08}",
            crate::ORDER_NUMBER_PREFIX,
            timestamp_millis.rem_euclid(100_000_000)
        )
    }

    /// Non-cancelled purchases count towards volume and consistency checks.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status != OrderStatus::Cancelled
    }

    #[inline]
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    /// Returns the total amount as Money.
    #[inline]
    pub fn total_amount(&self) -> Money {
        Money::from_cents(self.total_amount_cents)
    }
}

/// Input for registering a purchase.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewPurchase {
    pub box_id: String,
    pub user_id: String,
    pub kg: i64,
    pub payment_link: Option<String>,
    #[ts(as = "Option<String>")]
    pub payment_expires_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Status Audit Log
// =============================================================================

/// Immutable record of one committed status transition.
///
/// `reason` is omitted from the serialized form when absent, never written
/// as `null` or an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StatusLogEntry {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Status code before the transition.
    pub previous_status: String,
    /// Status code after the transition.
    pub next_status: String,
    /// True when the edge is not in the static graph.
    pub forced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub reason: Option<String>,
    /// Actor id (admin user or the system actor).
    pub performed_by: String,
    #[ts(as = "String")]
    pub performed_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_box() -> MeatBox {
        let now = Utc::now();
        MeatBox {
            id: "box-1".to_string(),
            name: "Picanha".to_string(),
            brand: "Friboi".to_string(),
            price_per_kg_cents: 8990,
            cost_per_kg_cents: 6500,
            total_kg: 10,
            remaining_kg: 10,
            min_kg_per_person: 2,
            payment_type: PaymentType::Prepaid,
            status: BoxStatus::WaitingPurchases,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    #[test]
    fn test_new_box_starts_full_and_waiting() {
        let input = NewBox {
            name: " Fraldinha ".to_string(),
            brand: "Minerva".to_string(),
            price_per_kg_cents: 5490,
            cost_per_kg_cents: 3900,
            total_kg: 12,
            min_kg_per_person: 1,
            payment_type: PaymentType::Postpaid,
        };
        let meat_box = MeatBox::from_new("box-9", &input, Utc::now());
        assert_eq!(meat_box.name, "Fraldinha");
        assert_eq!(meat_box.status, BoxStatus::WaitingPurchases);
        assert_eq!(meat_box.remaining_kg, 12);
        assert_eq!(meat_box.version, 0);
        assert!(meat_box.is_open_for_purchases());
    }

    #[test]
    fn test_box_open_for_purchases() {
        let mut meat_box = sample_box();
        assert!(meat_box.is_open_for_purchases());

        meat_box.remaining_kg = 0;
        assert!(!meat_box.is_open_for_purchases());

        meat_box.remaining_kg = 3;
        meat_box.deleted_at = Some(Utc::now());
        assert!(!meat_box.is_open_for_purchases());

        meat_box.deleted_at = None;
        meat_box.status = BoxStatus::WaitingSupplierOrder;
        assert!(!meat_box.is_open_for_purchases());
    }

    #[test]
    fn test_log_entry_omits_missing_reason() {
        let entry = StatusLogEntry {
            id: "log-1".to_string(),
            entity_type: EntityType::Order,
            entity_id: "order-1".to_string(),
            previous_status: "waiting_payment".to_string(),
            next_status: "waiting_box_closure".to_string(),
            forced: false,
            reason: None,
            performed_by: "admin".to_string(),
            performed_at: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("reason").is_none());
        assert_eq!(json["entity_type"], "order");
    }

    #[test]
    fn test_payment_status_default() {
        assert_eq!(PaymentStatus::default(), PaymentStatus::Pending);
    }
}
