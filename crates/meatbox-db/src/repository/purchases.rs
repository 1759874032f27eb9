//! # Purchase Repository
//!
//! Database operations for purchases (orders).
//!
//! ## Key Operations
//! - Insert and lookups by id, box and buyer
//! - Version-checked status writes, committed together with their status
//!   log entry
//! - Payment status and dispatch checklist writes
//!
//! Purchases reference their box by id; the box never embeds them.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::status_log::append_entry;
use meatbox_core::{
    DispatchSteps, Lifecycle, OrderStatus, PaymentStatus, Purchase, StatusLogEntry,
};

const ENTITY: &str = "purchase";

const SELECT_PURCHASE: &str = r#"
    SELECT
        id, order_number, box_id, user_id, kg_purchased, total_amount_cents,
        status, payment_status, payment_link, payment_expires_at,
        order_separated, separated_at, picked_up_by_courier, picked_up_at,
        created_at, updated_at, version
    FROM purchases
"#;

#[derive(Debug, FromRow)]
struct PurchaseRow {
    id: String,
    order_number: String,
    box_id: String,
    user_id: String,
    kg_purchased: i64,
    total_amount_cents: i64,
    status: String,
    payment_status: PaymentStatus,
    payment_link: Option<String>,
    payment_expires_at: Option<DateTime<Utc>>,
    order_separated: bool,
    separated_at: Option<DateTime<Utc>>,
    picked_up_by_courier: bool,
    picked_up_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl From<PurchaseRow> for Purchase {
    fn from(row: PurchaseRow) -> Self {
        Purchase {
            id: row.id,
            order_number: row.order_number,
            box_id: row.box_id,
            user_id: row.user_id,
            kg_purchased: row.kg_purchased,
            total_amount_cents: row.total_amount_cents,
            status: OrderStatus::normalize(&row.status),
            payment_status: row.payment_status,
            payment_link: row.payment_link,
            payment_expires_at: row.payment_expires_at,
            dispatch: DispatchSteps {
                order_separated: row.order_separated,
                separated_at: row.separated_at,
                picked_up_by_courier: row.picked_up_by_courier,
                picked_up_at: row.picked_up_at,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        }
    }
}

/// Repository for purchase database operations.
#[derive(Debug, Clone)]
pub struct PurchaseRepository {
    pool: SqlitePool,
}

impl PurchaseRepository {
    /// Creates a new PurchaseRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PurchaseRepository { pool }
    }

    /// Inserts a purchase as given.
    pub async fn insert(&self, purchase: &Purchase) -> DbResult<Purchase> {
        debug!(
            id = %purchase.id,
            box_id = %purchase.box_id,
            kg = purchase.kg_purchased,
            "Inserting purchase"
        );

        sqlx::query(
            r#"
            INSERT INTO purchases (
                id, order_number, box_id, user_id, kg_purchased, total_amount_cents,
                status, payment_status, payment_link, payment_expires_at,
                order_separated, separated_at, picked_up_by_courier, picked_up_at,
                created_at, updated_at, version
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17
            )
            "#,
        )
        .bind(&purchase.id)
        .bind(&purchase.order_number)
        .bind(&purchase.box_id)
        .bind(&purchase.user_id)
        .bind(purchase.kg_purchased)
        .bind(purchase.total_amount_cents)
        .bind(purchase.status.code())
        .bind(purchase.payment_status)
        .bind(&purchase.payment_link)
        .bind(purchase.payment_expires_at)
        .bind(purchase.dispatch.order_separated)
        .bind(purchase.dispatch.separated_at)
        .bind(purchase.dispatch.picked_up_by_courier)
        .bind(purchase.dispatch.picked_up_at)
        .bind(purchase.created_at)
        .bind(purchase.updated_at)
        .bind(purchase.version)
        .execute(&self.pool)
        .await?;

        Ok(purchase.clone())
    }

    /// Gets a purchase by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Purchase>> {
        let row: Option<PurchaseRow> =
            sqlx::query_as(&format!("{SELECT_PURCHASE} WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Purchase::from))
    }

    /// Lists all purchases of a box (cancelled included), oldest first.
    pub async fn list_by_box(&self, box_id: &str) -> DbResult<Vec<Purchase>> {
        let rows: Vec<PurchaseRow> = sqlx::query_as(&format!(
            "{SELECT_PURCHASE} WHERE box_id = ?1 ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(box_id)
        .fetch_all(&self.pool)
        .await?;

        debug!(box_id = %box_id, count = rows.len(), "Loaded purchases for box");
        Ok(rows.into_iter().map(Purchase::from).collect())
    }

    /// Lists a buyer's purchases, newest first.
    pub async fn list_by_user(&self, user_id: &str) -> DbResult<Vec<Purchase>> {
        let rows: Vec<PurchaseRow> = sqlx::query_as(&format!(
            "{SELECT_PURCHASE} WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Purchase::from).collect())
    }

    /// Writes `status` only if the stored version still equals
    /// `expected_version`, and appends `entry` to the status log in the same
    /// transaction. Returns the new version.
    pub async fn write_status_if_unchanged(
        &self,
        id: &str,
        next: OrderStatus,
        expected_version: i64,
        entry: &StatusLogEntry,
    ) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE purchases SET
                status = ?2,
                updated_at = ?3,
                version = version + 1
            WHERE id = ?1 AND version = ?4
            "#,
        )
        .bind(id)
        .bind(next.code())
        .bind(Utc::now())
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return match self.get_by_id(id).await? {
                Some(_) => Err(DbError::conflict(ENTITY, id, expected_version)),
                None => Err(DbError::not_found(ENTITY, id)),
            };
        }

        append_entry(&mut tx, entry).await?;
        tx.commit().await?;

        Ok(expected_version + 1)
    }

    /// Writes the payment status.
    pub async fn set_payment_status(&self, id: &str, payment_status: PaymentStatus) -> DbResult<()> {
        debug!(id = %id, ?payment_status, "Updating payment status");

        let result =
            sqlx::query("UPDATE purchases SET payment_status = ?2, updated_at = ?3 WHERE id = ?1")
                .bind(id)
                .bind(payment_status)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(ENTITY, id));
        }
        Ok(())
    }

    /// Marks the order as separated in the warehouse.
    pub async fn set_separated(&self, id: &str, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE purchases SET
                order_separated = 1,
                separated_at = ?2,
                updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(ENTITY, id));
        }
        Ok(())
    }

    /// Sets or clears the courier pickup flag. The timestamp is cleared
    /// together with the flag.
    pub async fn set_picked_up(&self, id: &str, picked_up: bool) -> DbResult<()> {
        let now = Utc::now();
        let picked_up_at = picked_up.then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE purchases SET
                picked_up_by_courier = ?2,
                picked_up_at = ?3,
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(picked_up)
        .bind(picked_up_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(ENTITY, id));
        }
        Ok(())
    }
}

/// Helper to generate a new purchase ID.
pub fn generate_purchase_id() -> String {
    Uuid::new_v4().to_string()
}
