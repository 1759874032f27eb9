//! # Audit Log
//!
//! Append-only record of every committed status transition. The engine's
//! commit path stores each entry in the same write as the status it
//! describes; [`AuditLog::record`] appends entries on their own.
//!
//! `fetch` issues a single equality-filtered read by entity id. Filtering by
//! entity type and ordering newest first happen here, after the read.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use meatbox_core::{EntityType, Lifecycle, StatusLogEntry};

use crate::error::StatusResult;
use crate::store::StatusStore;

/// Builds the log entry for a committed `from -> to` edge.
///
/// `forced` is true when the edge is not in the static graph, whatever the
/// caller asked for. A blank reason is dropped.
pub fn transition_entry<S: Lifecycle>(
    entity_id: &str,
    from: S,
    to: S,
    actor_id: &str,
    reason: Option<&str>,
) -> StatusLogEntry {
    StatusLogEntry {
        id: Uuid::new_v4().to_string(),
        entity_type: S::ENTITY,
        entity_id: entity_id.to_string(),
        previous_status: from.code().to_string(),
        next_status: to.code().to_string(),
        forced: !meatbox_core::is_valid_transition(from, to),
        reason: reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string),
        performed_by: actor_id.to_string(),
        performed_at: Utc::now(),
    }
}

/// Reads and writes the status audit log.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn StatusStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        AuditLog { store }
    }

    /// Appends an entry. A blank reason is dropped, never stored as "".
    pub async fn record(&self, mut entry: StatusLogEntry) -> StatusResult<()> {
        entry.reason = entry
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        self.store.append_status_log(&entry).await?;
        Ok(())
    }

    /// All entries for one entity, newest first.
    pub async fn fetch(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> StatusResult<Vec<StatusLogEntry>> {
        let mut entries: Vec<StatusLogEntry> = self
            .store
            .list_status_log(entity_id)
            .await?
            .into_iter()
            .filter(|e| e.entity_type == entity_type)
            .collect();

        // Insertion order reversed first, so equal timestamps stay newest first.
        entries.reverse();
        entries.sort_by(|a, b| b.performed_at.cmp(&a.performed_at));

        debug!(%entity_type, entity_id, count = entries.len(), "Fetched audit log");
        Ok(entries)
    }
}
