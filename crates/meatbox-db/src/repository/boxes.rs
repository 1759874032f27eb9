//! # Box Repository
//!
//! Database operations for boxes.
//!
//! ## Key Operations
//! - Insert, reads and field updates with soft delete / restore
//! - Version-checked status writes (the only way `status` changes), each
//!   committed together with its status log entry
//! - Remaining volume writes
//!
//! ## Optimistic Status Write
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  read box (status = A, version = 7)                                     │
//! │       │                                                                 │
//! │       ▼  validate A -> B in the engine                                  │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │  UPDATE boxes SET status = B, version = version + 1                     │
//! │  WHERE id = ? AND version = 7                                           │
//! │       │                                                                 │
//! │       ├── 1 row  → INSERT INTO status_logs, COMMIT (version 8)          │
//! │       └── 0 rows → ROLLBACK, someone else wrote first: VersionConflict  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::status_log::append_entry;
use meatbox_core::{BoxStatus, BoxUpdate, Lifecycle, MeatBox, PaymentType, StatusLogEntry};

const ENTITY: &str = "box";

const SELECT_BOX: &str = r#"
    SELECT
        id, name, brand, price_per_kg_cents, cost_per_kg_cents,
        total_kg, remaining_kg, min_kg_per_person, payment_type,
        status, deleted_at, created_at, updated_at, version
    FROM boxes
"#;

/// Raw row; `status` is decoded through [`BoxStatus::normalize`] so rows
/// holding legacy values still load.
#[derive(Debug, FromRow)]
struct BoxRow {
    id: String,
    name: String,
    brand: String,
    price_per_kg_cents: i64,
    cost_per_kg_cents: i64,
    total_kg: i64,
    remaining_kg: i64,
    min_kg_per_person: i64,
    payment_type: PaymentType,
    status: String,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl From<BoxRow> for MeatBox {
    fn from(row: BoxRow) -> Self {
        MeatBox {
            id: row.id,
            name: row.name,
            brand: row.brand,
            price_per_kg_cents: row.price_per_kg_cents,
            cost_per_kg_cents: row.cost_per_kg_cents,
            total_kg: row.total_kg,
            remaining_kg: row.remaining_kg,
            min_kg_per_person: row.min_kg_per_person,
            payment_type: row.payment_type,
            status: BoxStatus::normalize(&row.status),
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        }
    }
}

/// Repository for box database operations.
#[derive(Debug, Clone)]
pub struct BoxRepository {
    pool: SqlitePool,
}

impl BoxRepository {
    /// Creates a new BoxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BoxRepository { pool }
    }

    /// Inserts a box as given.
    pub async fn insert(&self, meat_box: &MeatBox) -> DbResult<MeatBox> {
        debug!(id = %meat_box.id, name = %meat_box.name, "Inserting box");

        sqlx::query(
            r#"
            INSERT INTO boxes (
                id, name, brand, price_per_kg_cents, cost_per_kg_cents,
                total_kg, remaining_kg, min_kg_per_person, payment_type,
                status, deleted_at, created_at, updated_at, version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&meat_box.id)
        .bind(&meat_box.name)
        .bind(&meat_box.brand)
        .bind(meat_box.price_per_kg_cents)
        .bind(meat_box.cost_per_kg_cents)
        .bind(meat_box.total_kg)
        .bind(meat_box.remaining_kg)
        .bind(meat_box.min_kg_per_person)
        .bind(meat_box.payment_type)
        .bind(meat_box.status.code())
        .bind(meat_box.deleted_at)
        .bind(meat_box.created_at)
        .bind(meat_box.updated_at)
        .bind(meat_box.version)
        .execute(&self.pool)
        .await?;

        Ok(meat_box.clone())
    }

    /// Gets a box by ID, including soft-deleted boxes.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<MeatBox>> {
        let row: Option<BoxRow> = sqlx::query_as(&format!("{SELECT_BOX} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(MeatBox::from))
    }

    /// Lists boxes, newest first.
    pub async fn list(&self, include_deleted: bool) -> DbResult<Vec<MeatBox>> {
        let sql = if include_deleted {
            format!("{SELECT_BOX} ORDER BY created_at DESC, rowid DESC")
        } else {
            format!("{SELECT_BOX} WHERE deleted_at IS NULL ORDER BY created_at DESC, rowid DESC")
        };

        let rows: Vec<BoxRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(MeatBox::from).collect())
    }

    /// Lists boxes accepting purchases, newest first.
    pub async fn list_open(&self) -> DbResult<Vec<MeatBox>> {
        let rows: Vec<BoxRow> = sqlx::query_as(&format!(
            "{SELECT_BOX} WHERE deleted_at IS NULL AND status = ?1 \
             ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(BoxStatus::WaitingPurchases.code())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MeatBox::from).collect())
    }

    /// Applies a patch to the non-status fields. Leaves `status` and
    /// `version` untouched.
    pub async fn update_fields(&self, id: &str, patch: &BoxUpdate) -> DbResult<()> {
        debug!(id = %id, "Updating box fields");

        let result = sqlx::query(
            r#"
            UPDATE boxes SET
                name = COALESCE(?2, name),
                brand = COALESCE(?3, brand),
                price_per_kg_cents = COALESCE(?4, price_per_kg_cents),
                cost_per_kg_cents = COALESCE(?5, cost_per_kg_cents),
                total_kg = COALESCE(?6, total_kg),
                min_kg_per_person = COALESCE(?7, min_kg_per_person),
                updated_at = ?8
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(patch.name.as_deref().map(str::trim))
        .bind(patch.brand.as_deref().map(str::trim))
        .bind(patch.price_per_kg_cents)
        .bind(patch.cost_per_kg_cents)
        .bind(patch.total_kg)
        .bind(patch.min_kg_per_person)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(ENTITY, id));
        }
        Ok(())
    }

    /// Writes the remaining volume.
    pub async fn set_remaining_kg(&self, id: &str, remaining_kg: i64) -> DbResult<()> {
        debug!(id = %id, remaining_kg, "Updating remaining volume");

        let result = sqlx::query("UPDATE boxes SET remaining_kg = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(remaining_kg.max(0))
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(ENTITY, id));
        }
        Ok(())
    }

    /// Writes `status` only if the stored version still equals
    /// `expected_version`, and appends `entry` to the status log in the same
    /// transaction. Either both land or neither does. Returns the new version.
    pub async fn write_status_if_unchanged(
        &self,
        id: &str,
        next: BoxStatus,
        expected_version: i64,
        entry: &StatusLogEntry,
    ) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE boxes SET
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

    /// Soft-deletes a box.
    pub async fn soft_delete(&self, id: &str) -> DbResult<()> {
        debug!(id = %id, "Soft-deleting box");
        self.set_deleted_at(id, Some(Utc::now())).await
    }

    /// Restores a soft-deleted box.
    pub async fn restore(&self, id: &str) -> DbResult<()> {
        debug!(id = %id, "Restoring box");
        self.set_deleted_at(id, None).await
    }

    async fn set_deleted_at(&self, id: &str, deleted_at: Option<DateTime<Utc>>) -> DbResult<()> {
        let result = sqlx::query("UPDATE boxes SET deleted_at = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(deleted_at)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(ENTITY, id));
        }
        Ok(())
    }

    /// Counts boxes that are not deleted.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM boxes WHERE deleted_at IS NULL")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

/// Helper to generate a new box ID.
pub fn generate_box_id() -> String {
    Uuid::new_v4().to_string()
}
