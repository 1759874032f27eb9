//! # Status Store
//!
//! The storage seam of the engine. Everything the engine reads or writes
//! goes through [`StatusStore`], so the engine can run against SQLite in
//! production and against an in-memory store in tests.
//!
//! ## Primitives
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  get_box / get_purchase          read one aggregate (with version)      │
//! │  list_purchases(box_id)          purchases-by-box lookup                │
//! │  write_*_status(id, next, ver,   optimistic write of one status plus    │
//! │                 entry)           its audit entry, all or nothing        │
//! │  append_status_log / list_*      audit log                              │
//! │  insert_* / set_*                non-status fields                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A status write that loses the version check fails with
//! [`DbError::VersionConflict`]; the engine re-reads and retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use meatbox_core::{
    BoxStatus, MeatBox, OrderStatus, PaymentStatus, Purchase, StatusLogEntry,
};
use meatbox_db::{Database, DbResult};

#[cfg(test)]
pub(crate) mod memory;

/// Persistence operations the engine depends on.
#[async_trait]
pub trait StatusStore: Send + Sync {
    // =========================================================================
    // Boxes
    // =========================================================================
    async fn get_box(&self, id: &str) -> DbResult<Option<MeatBox>>;

    async fn insert_box(&self, meat_box: &MeatBox) -> DbResult<MeatBox>;

    /// Writes `status` only if the stored version is `expected_version`,
    /// together with its audit entry. Neither lands unless both do.
    /// Returns the new version.
    async fn write_box_status(
        &self,
        id: &str,
        next: BoxStatus,
        expected_version: i64,
        entry: &StatusLogEntry,
    ) -> DbResult<i64>;

    async fn set_remaining_kg(&self, box_id: &str, remaining_kg: i64) -> DbResult<()>;

    // =========================================================================
    // Purchases
    // =========================================================================
    async fn get_purchase(&self, id: &str) -> DbResult<Option<Purchase>>;

    /// Purchases of a box, oldest first.
    async fn list_purchases(&self, box_id: &str) -> DbResult<Vec<Purchase>>;

    async fn insert_purchase(&self, purchase: &Purchase) -> DbResult<Purchase>;

    /// Same contract as [`StatusStore::write_box_status`].
    async fn write_order_status(
        &self,
        id: &str,
        next: OrderStatus,
        expected_version: i64,
        entry: &StatusLogEntry,
    ) -> DbResult<i64>;

    async fn set_payment_status(&self, id: &str, payment_status: PaymentStatus) -> DbResult<()>;

    async fn set_separated(&self, id: &str, at: DateTime<Utc>) -> DbResult<()>;

    async fn set_picked_up(&self, id: &str, picked_up: bool) -> DbResult<()>;

    // =========================================================================
    // Audit Log
    // =========================================================================
    async fn append_status_log(&self, entry: &StatusLogEntry) -> DbResult<()>;

    /// Entries for one entity id, in insertion order.
    async fn list_status_log(&self, entity_id: &str) -> DbResult<Vec<StatusLogEntry>>;
}

// =============================================================================
// SQLite
// =============================================================================

#[async_trait]
impl StatusStore for Database {
    async fn get_box(&self, id: &str) -> DbResult<Option<MeatBox>> {
        self.boxes().get_by_id(id).await
    }

    async fn insert_box(&self, meat_box: &MeatBox) -> DbResult<MeatBox> {
        self.boxes().insert(meat_box).await
    }

    async fn write_box_status(
        &self,
        id: &str,
        next: BoxStatus,
        expected_version: i64,
        entry: &StatusLogEntry,
    ) -> DbResult<i64> {
        self.boxes()
            .write_status_if_unchanged(id, next, expected_version, entry)
            .await
    }

    async fn set_remaining_kg(&self, box_id: &str, remaining_kg: i64) -> DbResult<()> {
        self.boxes().set_remaining_kg(box_id, remaining_kg).await
    }

    async fn get_purchase(&self, id: &str) -> DbResult<Option<Purchase>> {
        self.purchases().get_by_id(id).await
    }

    async fn list_purchases(&self, box_id: &str) -> DbResult<Vec<Purchase>> {
        self.purchases().list_by_box(box_id).await
    }

    async fn insert_purchase(&self, purchase: &Purchase) -> DbResult<Purchase> {
        self.purchases().insert(purchase).await
    }

    async fn write_order_status(
        &self,
        id: &str,
        next: OrderStatus,
        expected_version: i64,
        entry: &StatusLogEntry,
    ) -> DbResult<i64> {
        self.purchases()
            .write_status_if_unchanged(id, next, expected_version, entry)
            .await
    }

    async fn set_payment_status(&self, id: &str, payment_status: PaymentStatus) -> DbResult<()> {
        self.purchases().set_payment_status(id, payment_status).await
    }

    async fn set_separated(&self, id: &str, at: DateTime<Utc>) -> DbResult<()> {
        self.purchases().set_separated(id, at).await
    }

    async fn set_picked_up(&self, id: &str, picked_up: bool) -> DbResult<()> {
        self.purchases().set_picked_up(id, picked_up).await
    }

    async fn append_status_log(&self, entry: &StatusLogEntry) -> DbResult<()> {
        self.status_logs().insert(entry).await
    }

    async fn list_status_log(&self, entity_id: &str) -> DbResult<Vec<StatusLogEntry>> {
        self.status_logs().list_for_entity(entity_id).await
    }
}
