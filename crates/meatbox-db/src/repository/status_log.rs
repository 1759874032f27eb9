//! # Status Log Repository
//!
//! Append-only storage for status transition audit entries.
//!
//! Reads use a single equality filter on `entity_id`. Filtering by entity
//! type and ordering by time are left to the caller, so the only index the
//! table needs is the one on `entity_id`.
//!
//! Entries for status transitions are appended by the version-checked
//! status writes of the box and purchase repositories, inside the same
//! transaction as the write (see [`append_entry`]).

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::error::DbResult;
use meatbox_core::{EntityType, StatusLogEntry};

#[derive(Debug, FromRow)]
struct StatusLogRow {
    id: String,
    entity_type: EntityType,
    entity_id: String,
    previous_status: String,
    next_status: String,
    forced: bool,
    reason: Option<String>,
    performed_by: String,
    performed_at: DateTime<Utc>,
}

impl From<StatusLogRow> for StatusLogEntry {
    fn from(row: StatusLogRow) -> Self {
        StatusLogEntry {
            id: row.id,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            previous_status: row.previous_status,
            next_status: row.next_status,
            forced: row.forced,
            reason: row.reason.filter(|r| !r.is_empty()),
            performed_by: row.performed_by,
            performed_at: row.performed_at,
        }
    }
}

/// Repository for the status audit log.
#[derive(Debug, Clone)]
pub struct StatusLogRepository {
    pool: SqlitePool,
}

impl StatusLogRepository {
    /// Creates a new StatusLogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StatusLogRepository { pool }
    }

    /// Appends an entry on its own. An empty reason is stored as NULL.
    pub async fn insert(&self, entry: &StatusLogEntry) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        append_entry(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    /// All entries for an entity id, in insertion order.
    pub async fn list_for_entity(&self, entity_id: &str) -> DbResult<Vec<StatusLogEntry>> {
        let rows: Vec<StatusLogRow> = sqlx::query_as(
            r#"
            SELECT
                id, entity_type, entity_id, previous_status, next_status,
                forced, reason, performed_by, performed_at
            FROM status_logs
            WHERE entity_id = ?1
            ORDER BY rowid ASC
            "#,
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StatusLogEntry::from).collect())
    }
}

/// Appends an entry inside an open transaction. An empty reason is stored
/// as NULL.
pub(crate) async fn append_entry(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &StatusLogEntry,
) -> DbResult<()> {
    debug!(
        entity_type = %entry.entity_type,
        entity_id = %entry.entity_id,
        from = %entry.previous_status,
        to = %entry.next_status,
        forced = entry.forced,
        "Appending status log entry"
    );

    let reason = entry.reason.as_deref().filter(|r| !r.trim().is_empty());

    sqlx::query(
        r#"
        INSERT INTO status_logs (
            id, entity_type, entity_id, previous_status, next_status,
            forced, reason, performed_by, performed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&entry.id)
    .bind(entry.entity_type)
    .bind(&entry.entity_id)
    .bind(&entry.previous_status)
    .bind(&entry.next_status)
    .bind(entry.forced)
    .bind(reason)
    .bind(&entry.performed_by)
    .bind(entry.performed_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
