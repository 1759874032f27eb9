//! # Status Engine
//!
//! The single writer of the `status` field of boxes and purchases.
//!
//! ## Transition Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    change_box_status / change_order_status              │
//! │                                                                         │
//! │  1. Guard      (entity, id, next) already in flight? → InProgress       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  2. Read       current status + version                                 │
//! │       │        same status? → Unchanged (nothing written, no log)       │
//! │       ▼                                                                 │
//! │  3. Validate   edge in graph, or force                                  │
//! │       │        box → dispatching/completed: force always required       │
//! │       ▼                                                                 │
//! │  4. Write      UPDATE ... WHERE version = read version, plus the audit  │
//! │       │        entry (forced = edge not in graph), in one transaction   │
//! │       │        lost the race? → back to 2 (max_write_attempts)          │
//! │       ▼                                                                 │
//! │  5. Propagate  separate best-effort writes, failures reported           │
//! │                (propagated writes never propagate again)                │
//! │                                                                         │
//! │  Guard released on every exit path.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//! ```text
//!  BOX → ORDERS (active orders, forward only)
//!    waiting_supplier_order     waiting_box_closure → in_purchase_process
//!    waiting_supplier_delivery  → waiting_supplier
//!    supplier_delivery_received → waiting_client_shipment
//!    dispatching                nothing; waiting_client_shipment orders are
//!                               reported as awaiting manual dispatch
//!    completed                  → delivered_to_client
//!
//!  ORDER → BOX (forced, forward only)
//!    dispatching_to_client      box → dispatching
//!    delivered_to_client        box → completed, once every active order
//!                               is delivered
//!    into or out of cancelled   box remaining_kg recomputed
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use meatbox_core::consistency::{assess_order, propagation_target, OrderAlignment};
use meatbox_core::validation::validate_actor_id;
use meatbox_core::{
    is_valid_transition, valid_next_statuses, BoxStatus, EntityType, Lifecycle, OrderStatus,
    StatusLogEntry,
};
use meatbox_db::{Database, DbError, DbResult};

use crate::audit::{transition_entry, AuditLog};
use crate::config::{EngineConfig, EngineSettings};
use crate::error::{ErrorKind, StatusError, StatusResult};
use crate::guard::TransitionGuard;
use crate::store::StatusStore;

// =============================================================================
// Requests and Outcomes
// =============================================================================

/// Who asks for a transition, why, and whether to bypass the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub actor_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub force: bool,
}

impl TransitionRequest {
    pub fn by(actor_id: impl Into<String>) -> Self {
        TransitionRequest {
            actor_id: actor_id.into(),
            reason: None,
            force: false,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Bypass the static graph. Admin overrides should carry a reason.
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// One committed status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition<S> {
    pub entity_id: String,
    pub from: S,
    pub to: S,
    /// The edge is not in the static graph.
    pub forced: bool,
    /// Version after the write.
    pub version: i64,
}

/// What happened to the entity a caller asked to move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome<S> {
    Applied(Transition<S>),
    /// Already in the requested status.
    Unchanged,
    /// The same transition was already in flight.
    InProgress,
}

impl<S> TransitionOutcome<S> {
    pub fn applied(&self) -> Option<&Transition<S>> {
        match self {
            TransitionOutcome::Applied(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.applied().is_some()
    }
}

/// A propagated write that failed after the triggering transition
/// committed. Never rolls the trigger back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationFailure {
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Status code the propagation tried to reach, or `remaining_kg` for a
    /// failed volume recompute.
    pub target: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl PropagationFailure {
    fn new(entity_type: EntityType, entity_id: &str, target: &str, err: &StatusError) -> Self {
        PropagationFailure {
            entity_type,
            entity_id: entity_id.to_string(),
            target: target.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn to_error(&self) -> StatusError {
        StatusError::PropagationFailure {
            entity: self.entity_type,
            id: self.entity_id.clone(),
            message: self.message.clone(),
        }
    }
}

/// Result of [`StatusEngine::change_box_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxTransitionReport {
    pub outcome: TransitionOutcome<BoxStatus>,
    /// Orders moved by propagation.
    pub orders_updated: Vec<Transition<OrderStatus>>,
    /// Orders left for the manual dispatch checklist.
    pub awaiting_manual_dispatch: Vec<String>,
    pub propagation_failures: Vec<PropagationFailure>,
}

impl BoxTransitionReport {
    fn new(outcome: TransitionOutcome<BoxStatus>) -> Self {
        BoxTransitionReport {
            outcome,
            orders_updated: Vec::new(),
            awaiting_manual_dispatch: Vec::new(),
            propagation_failures: Vec::new(),
        }
    }
}

/// Result of [`StatusEngine::change_order_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTransitionReport {
    pub outcome: TransitionOutcome<OrderStatus>,
    pub box_was_updated: bool,
    pub box_transition: Option<Transition<BoxStatus>>,
    /// Remaining volume of the box, recomputed when the order entered or
    /// left `cancelled`.
    pub remaining_kg: Option<i64>,
    pub propagation_failures: Vec<PropagationFailure>,
}

impl OrderTransitionReport {
    fn new(outcome: TransitionOutcome<OrderStatus>) -> Self {
        OrderTransitionReport {
            outcome,
            box_was_updated: false,
            box_transition: None,
            remaining_kg: None,
            propagation_failures: Vec::new(),
        }
    }
}

// =============================================================================
// Per-aggregate Access
// =============================================================================

pub(crate) struct Snapshot<S> {
    status: S,
    version: i64,
    box_id: String,
}

pub(crate) struct Committed<S> {
    pub transition: Transition<S>,
    pub box_id: String,
}

/// Loads and writes the status of one aggregate kind.
#[async_trait]
pub(crate) trait Tracked: Lifecycle {
    async fn load(store: &dyn StatusStore, id: &str) -> DbResult<Option<Snapshot<Self>>>;

    /// Version-checked write of `next` together with its audit entry.
    async fn write(
        store: &dyn StatusStore,
        id: &str,
        next: Self,
        expected_version: i64,
        entry: &StatusLogEntry,
    ) -> DbResult<i64>;

    /// States that may only be entered with `force`, even along a valid edge.
    fn requires_force(self) -> bool {
        false
    }
}

#[async_trait]
impl Tracked for BoxStatus {
    async fn load(store: &dyn StatusStore, id: &str) -> DbResult<Option<Snapshot<Self>>> {
        Ok(store.get_box(id).await?.map(|b| Snapshot {
            status: b.status,
            version: b.version,
            box_id: b.id,
        }))
    }

    async fn write(
        store: &dyn StatusStore,
        id: &str,
        next: Self,
        expected_version: i64,
        entry: &StatusLogEntry,
    ) -> DbResult<i64> {
        store.write_box_status(id, next, expected_version, entry).await
    }

    fn requires_force(self) -> bool {
        matches!(self, BoxStatus::Dispatching | BoxStatus::Completed)
    }
}

#[async_trait]
impl Tracked for OrderStatus {
    async fn load(store: &dyn StatusStore, id: &str) -> DbResult<Option<Snapshot<Self>>> {
        Ok(store.get_purchase(id).await?.map(|p| Snapshot {
            status: p.status,
            version: p.version,
            box_id: p.box_id,
        }))
    }

    async fn write(
        store: &dyn StatusStore,
        id: &str,
        next: Self,
        expected_version: i64,
        entry: &StatusLogEntry,
    ) -> DbResult<i64> {
        store.write_order_status(id, next, expected_version, entry).await
    }
}

fn invalid_transition<S: Lifecycle>(from: S, to: S) -> StatusError {
    StatusError::InvalidTransition {
        entity: S::ENTITY,
        from: from.code().to_string(),
        to: to.code().to_string(),
        allowed: valid_next_statuses(from)
            .into_iter()
            .map(|s| s.code().to_string())
            .collect(),
    }
}

fn moves_forward<S: Lifecycle>(from: S, to: S) -> bool {
    matches!((from.position(), to.position()), (Some(a), Some(b)) if a < b)
}

// =============================================================================
// Status Engine
// =============================================================================

/// Owns every status write. Cheap to clone: clones share the store and
/// the reentrancy guard.
#[derive(Clone)]
pub struct StatusEngine {
    store: Arc<dyn StatusStore>,
    audit: AuditLog,
    guard: TransitionGuard,
    settings: EngineSettings,
}

impl StatusEngine {
    /// Creates an engine over any store.
    pub fn new(store: Arc<dyn StatusStore>, settings: EngineSettings) -> Self {
        StatusEngine {
            audit: AuditLog::new(Arc::clone(&store)),
            store,
            guard: TransitionGuard::new(),
            settings,
        }
    }

    /// Opens the configured SQLite database and builds an engine over it.
    pub async fn open(config: &EngineConfig) -> StatusResult<Self> {
        config.validate()?;
        let db = Database::new(config.db_config()).await?;
        info!(path = ?config.database.path, "Status engine ready");
        Ok(Self::new(Arc::new(db), config.engine.clone()))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub(crate) fn store(&self) -> &dyn StatusStore {
        self.store.as_ref()
    }

    /// Request attributed to the configured system actor.
    pub(crate) fn system_request(&self, reason: impl Into<String>) -> TransitionRequest {
        TransitionRequest::by(self.settings.system_actor_id.clone()).with_reason(reason)
    }

    /// Audit entries of one entity, newest first.
    pub async fn fetch_audit_log(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> StatusResult<Vec<StatusLogEntry>> {
        self.audit.fetch(entity_type, entity_id).await
    }

    // =========================================================================
    // Public Entry Points
    // =========================================================================

    /// Moves a box, then aligns its active orders.
    pub async fn change_box_status(
        &self,
        box_id: &str,
        next: BoxStatus,
        request: TransitionRequest,
    ) -> StatusResult<BoxTransitionReport> {
        validate_actor_id(&request.actor_id)?;

        let committed = match self.commit::<BoxStatus>(box_id, next, &request, false).await {
            Ok(Some(committed)) => committed,
            Ok(None) => return Ok(BoxTransitionReport::new(TransitionOutcome::Unchanged)),
            Err(e) if e.is_benign() => {
                warn!(box_id, to = %next, "Box transition already in flight, skipping");
                return Ok(BoxTransitionReport::new(TransitionOutcome::InProgress));
            }
            Err(e) => return Err(e),
        };

        let mut report = BoxTransitionReport::new(TransitionOutcome::Applied(committed.transition));
        self.propagate_to_orders(box_id, next, &request, &mut report)
            .await;
        Ok(report)
    }

    /// Moves an order, then updates its box when the order starts dispatching
    /// or the last active order is delivered. Entering or leaving `cancelled`
    /// recomputes the box's remaining volume.
    pub async fn change_order_status(
        &self,
        order_id: &str,
        next: OrderStatus,
        request: TransitionRequest,
    ) -> StatusResult<OrderTransitionReport> {
        validate_actor_id(&request.actor_id)?;

        let committed = match self.commit::<OrderStatus>(order_id, next, &request, false).await {
            Ok(Some(committed)) => committed,
            Ok(None) => return Ok(OrderTransitionReport::new(TransitionOutcome::Unchanged)),
            Err(e) if e.is_benign() => {
                warn!(order_id, to = %next, "Order transition already in flight, skipping");
                return Ok(OrderTransitionReport::new(TransitionOutcome::InProgress));
            }
            Err(e) => return Err(e),
        };

        let box_id = committed.box_id;
        let releases_volume = committed.transition.from == OrderStatus::Cancelled
            || committed.transition.to == OrderStatus::Cancelled;
        let mut report = OrderTransitionReport::new(TransitionOutcome::Applied(committed.transition));
        if releases_volume {
            self.sync_remaining(&box_id, &mut report).await;
        }
        self.propagate_to_box(&box_id, next, &request, &mut report)
            .await;
        Ok(report)
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Guarded, version-checked write of one status plus its audit entry.
    /// The status and the entry are stored together or not at all. Never
    /// propagates.
    ///
    /// `Ok(None)` means nothing was written: the entity already had `next`,
    /// or `forward_only` is set and `next` is not ahead of it.
    pub(crate) async fn commit<S: Tracked>(
        &self,
        id: &str,
        next: S,
        request: &TransitionRequest,
        forward_only: bool,
    ) -> StatusResult<Option<Committed<S>>> {
        let _ticket = self
            .guard
            .try_acquire(S::ENTITY, id, next.code())
            .ok_or_else(|| StatusError::TransitionInProgress {
                entity: S::ENTITY,
                id: id.to_string(),
                next: next.code().to_string(),
            })?;

        let attempts = self.settings.max_write_attempts.max(1);
        for attempt in 1..=attempts {
            let snapshot = S::load(self.store(), id)
                .await?
                .ok_or_else(|| StatusError::not_found(S::ENTITY, id))?;
            let current = snapshot.status;

            if current == next {
                debug!(entity = %S::ENTITY, id, status = %next, "Already in requested status");
                return Ok(None);
            }
            if forward_only && !moves_forward(current, next) {
                debug!(entity = %S::ENTITY, id, from = %current, to = %next, "Not a forward move, leaving as is");
                return Ok(None);
            }

            let in_graph = is_valid_transition(current, next);
            if !request.force && (!in_graph || next.requires_force()) {
                return Err(invalid_transition(current, next));
            }

            let entry = transition_entry(
                id,
                current,
                next,
                &request.actor_id,
                request.reason.as_deref(),
            );
            match S::write(self.store(), id, next, snapshot.version, &entry).await {
                Ok(version) => {
                    let transition = Transition {
                        entity_id: id.to_string(),
                        from: current,
                        to: next,
                        forced: !in_graph,
                        version,
                    };
                    info!(
                        entity = %S::ENTITY,
                        id,
                        from = %current,
                        to = %next,
                        forced = transition.forced,
                        actor = %request.actor_id,
                        "Status transition committed"
                    );

                    return Ok(Some(Committed {
                        transition,
                        box_id: snapshot.box_id,
                    }));
                }
                Err(DbError::VersionConflict { .. }) => {
                    warn!(entity = %S::ENTITY, id, attempt, "Status write lost the version check");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StatusError::Conflict {
            entity: S::ENTITY,
            id: id.to_string(),
            attempts,
        })
    }

    // =========================================================================
    // Propagation
    // =========================================================================

    async fn propagate_to_orders(
        &self,
        box_id: &str,
        box_status: BoxStatus,
        request: &TransitionRequest,
        report: &mut BoxTransitionReport,
    ) {
        let purchases = match self.store.list_purchases(box_id).await {
            Ok(purchases) => purchases,
            Err(e) => {
                let err = StatusError::from(e);
                warn!(box_id, error = %err, "Could not list purchases for propagation");
                report.propagation_failures.push(PropagationFailure::new(
                    EntityType::Box,
                    box_id,
                    box_status.code(),
                    &err,
                ));
                return;
            }
        };

        let aligned = TransitionRequest {
            actor_id: request.actor_id.clone(),
            reason: Some(format!("Box aligned to {box_status}")),
            force: true,
        };

        for purchase in purchases.iter().filter(|p| p.is_active()) {
            if assess_order(box_status, purchase.status) == OrderAlignment::AwaitingManualDispatch {
                report.awaiting_manual_dispatch.push(purchase.id.clone());
                continue;
            }
            let Some(target) = propagation_target(box_status, purchase.status) else {
                continue;
            };

            match self.commit::<OrderStatus>(&purchase.id, target, &aligned, true).await {
                Ok(Some(committed)) => report.orders_updated.push(committed.transition),
                Ok(None) => {}
                Err(e) if e.is_benign() => {
                    debug!(order_id = %purchase.id, to = %target, "Order already moving, skipped");
                }
                Err(e) => {
                    warn!(order_id = %purchase.id, to = %target, error = %e, "Order propagation failed");
                    report.propagation_failures.push(PropagationFailure::new(
                        EntityType::Order,
                        &purchase.id,
                        target.code(),
                        &e,
                    ));
                }
            }
        }

        if !report.orders_updated.is_empty() || !report.awaiting_manual_dispatch.is_empty() {
            info!(
                box_id,
                to = %box_status,
                updated = report.orders_updated.len(),
                awaiting_manual_dispatch = report.awaiting_manual_dispatch.len(),
                failures = report.propagation_failures.len(),
                "Box propagated to orders"
            );
        }
    }

    async fn sync_remaining(&self, box_id: &str, report: &mut OrderTransitionReport) {
        match self.recompute_remaining(box_id).await {
            Ok(remaining) => report.remaining_kg = Some(remaining),
            Err(e) => {
                warn!(box_id, error = %e, "Could not recompute remaining volume");
                report.propagation_failures.push(PropagationFailure::new(
                    EntityType::Box,
                    box_id,
                    "remaining_kg",
                    &e,
                ));
            }
        }
    }

    async fn propagate_to_box(
        &self,
        box_id: &str,
        order_status: OrderStatus,
        request: &TransitionRequest,
        report: &mut OrderTransitionReport,
    ) {
        let (target, reason) = match order_status {
            OrderStatus::DispatchingToClient => (
                BoxStatus::Dispatching,
                "Auto: purchase dispatching".to_string(),
            ),
            OrderStatus::DeliveredToClient => {
                let purchases = match self.store.list_purchases(box_id).await {
                    Ok(purchases) => purchases,
                    Err(e) => {
                        let err = StatusError::from(e);
                        warn!(box_id, error = %err, "Could not list purchases for completion check");
                        report.propagation_failures.push(PropagationFailure::new(
                            EntityType::Box,
                            box_id,
                            BoxStatus::Completed.code(),
                            &err,
                        ));
                        return;
                    }
                };

                let active = purchases.iter().filter(|p| p.is_active()).count();
                let delivered = purchases
                    .iter()
                    .filter(|p| p.status == OrderStatus::DeliveredToClient)
                    .count();
                if active == 0 || delivered < active {
                    return;
                }
                (
                    BoxStatus::Completed,
                    format!("Auto: all active purchases delivered ({delivered}/{active})"),
                )
            }
            _ => return,
        };

        let propagated = TransitionRequest {
            actor_id: request.actor_id.clone(),
            reason: Some(reason),
            force: true,
        };

        match self.commit::<BoxStatus>(box_id, target, &propagated, true).await {
            Ok(Some(committed)) => {
                report.box_was_updated = true;
                report.box_transition = Some(committed.transition);
            }
            Ok(None) => {}
            Err(e) if e.is_benign() => {
                debug!(box_id, to = %target, "Box already moving, skipped");
            }
            Err(e) => {
                warn!(box_id, to = %target, error = %e, "Box propagation failed");
                report.propagation_failures.push(PropagationFailure::new(
                    EntityType::Box,
                    box_id,
                    target.code(),
                    &e,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use meatbox_core::{NewBox, NewPurchase, PaymentStatus, PaymentType};
    use meatbox_db::DbConfig;

    use crate::store::memory::MemoryStore;
    use crate::testing::{meat_box, purchase};

    use super::*;

    async fn setup(
        box_status: BoxStatus,
        orders: &[(&str, OrderStatus)],
    ) -> (StatusEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.put_box(meat_box("box-1", box_status, 10)).await;
        for (id, status) in orders {
            store
                .put_purchase(purchase(id, "box-1", 2, *status, true))
                .await;
        }
        let engine = StatusEngine::new(store.clone(), EngineSettings::default());
        (engine, store)
    }

    fn admin() -> TransitionRequest {
        TransitionRequest::by("admin-1")
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[tokio::test]
    async fn test_invalid_edge_lists_allowed_statuses() {
        let (engine, store) = setup(BoxStatus::WaitingPurchases, &[]).await;

        let err = engine
            .change_box_status("box-1", BoxStatus::WaitingSupplierDelivery, admin())
            .await
            .unwrap_err();
        match err {
            StatusError::InvalidTransition { from, to, allowed, .. } => {
                assert_eq!(from, "waiting_purchases");
                assert_eq!(to, "waiting_supplier_delivery");
                assert_eq!(allowed, vec!["waiting_supplier_order", "cancelled"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.box_status("box-1").await, Some(BoxStatus::WaitingPurchases));
        assert!(store.log_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatching_and_completed_need_force_on_valid_edge() {
        let (engine, store) = setup(BoxStatus::SupplierDeliveryReceived, &[]).await;

        let err = engine
            .change_box_status("box-1", BoxStatus::Dispatching, admin())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        let report = engine
            .change_box_status("box-1", BoxStatus::Dispatching, admin().forced())
            .await
            .unwrap();
        let applied = report.outcome.applied().unwrap();
        assert!(!applied.forced);
        assert_eq!(store.box_status("box-1").await, Some(BoxStatus::Dispatching));

        let err = engine
            .change_box_status("box-1", BoxStatus::Completed, admin())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn test_forced_skip_is_flagged_in_audit_log() {
        let (engine, store) = setup(
            BoxStatus::WaitingPurchases,
            &[("p-1", OrderStatus::WaitingBoxClosure)],
        )
        .await;

        let report = engine
            .change_box_status(
                "box-1",
                BoxStatus::WaitingSupplierDelivery,
                admin().forced().with_reason("supplier called early"),
            )
            .await
            .unwrap();
        assert!(report.outcome.applied().unwrap().forced);
        assert_eq!(
            store.order_status("p-1").await,
            Some(OrderStatus::WaitingSupplier)
        );

        let log = engine
            .fetch_audit_log(EntityType::Box, "box-1")
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].forced);
        assert_eq!(log[0].reason.as_deref(), Some("supplier called early"));
        assert_eq!(log[0].performed_by, "admin-1");

        let order_log = engine
            .fetch_audit_log(EntityType::Order, "p-1")
            .await
            .unwrap();
        assert_eq!(
            order_log[0].reason.as_deref(),
            Some("Box aligned to waiting_supplier_delivery")
        );
        assert_eq!(order_log[0].performed_by, "admin-1");
    }

    #[tokio::test]
    async fn test_same_status_is_unchanged() {
        let (engine, store) = setup(BoxStatus::WaitingPurchases, &[]).await;

        let report = engine
            .change_box_status("box-1", BoxStatus::WaitingPurchases, admin())
            .await
            .unwrap();
        assert_eq!(report.outcome, TransitionOutcome::Unchanged);
        assert!(store.log_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_blank_actor_and_missing_entity() {
        let (engine, _store) = setup(BoxStatus::WaitingPurchases, &[]).await;

        let err = engine
            .change_box_status("box-1", BoxStatus::Cancelled, TransitionRequest::by("  "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .change_order_status("ghost", OrderStatus::Cancelled, admin())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntityNotFound);
    }

    #[tokio::test]
    async fn test_failed_log_append_leaves_status_untouched() {
        let (engine, store) = setup(BoxStatus::WaitingPurchases, &[]).await;
        store.fail_log_appends().await;

        let err = engine
            .change_box_status("box-1", BoxStatus::WaitingSupplierOrder, admin())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(store.box_status("box-1").await, Some(BoxStatus::WaitingPurchases));
        assert!(store.log_entries().await.is_empty());

        store.clear_failures().await;
        let report = engine
            .change_box_status("box-1", BoxStatus::WaitingSupplierOrder, admin())
            .await
            .unwrap();
        assert_eq!(report.outcome.applied().unwrap().version, 1);
        assert_eq!(store.log_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_order_log_append_surfaces_error() {
        let (engine, store) = setup(
            BoxStatus::Dispatching,
            &[("p-1", OrderStatus::DispatchingToClient)],
        )
        .await;
        store.fail_log_appends().await;

        let err = engine
            .change_order_status("p-1", OrderStatus::DeliveredToClient, admin())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(
            store.order_status("p-1").await,
            Some(OrderStatus::DispatchingToClient)
        );
        assert_eq!(store.box_status("box-1").await, Some(BoxStatus::Dispatching));
        assert!(store.log_entries().await.is_empty());
    }

    // =========================================================================
    // Remaining Volume
    // =========================================================================

    async fn reserved_box() -> (StatusEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut meat_box = meat_box("box-1", BoxStatus::WaitingPurchases, 10);
        meat_box.remaining_kg = 3;
        store.put_box(meat_box).await;
        store
            .put_purchase(purchase("p-1", "box-1", 7, OrderStatus::WaitingPayment, false))
            .await;
        let engine = StatusEngine::new(store.clone(), EngineSettings::default());
        (engine, store)
    }

    async fn remaining(store: &MemoryStore) -> i64 {
        store.get_box("box-1").await.unwrap().unwrap().remaining_kg
    }

    #[tokio::test]
    async fn test_cancelling_order_restores_volume() {
        let (engine, store) = reserved_box().await;

        let report = engine
            .change_order_status("p-1", OrderStatus::Cancelled, admin())
            .await
            .unwrap();
        assert!(report.outcome.is_applied());
        assert_eq!(report.remaining_kg, Some(10));
        assert!(report.propagation_failures.is_empty());
        assert_eq!(remaining(&store).await, 10);

        // An admin reinstating the order takes the volume back.
        let report = engine
            .change_order_status(
                "p-1",
                OrderStatus::WaitingPayment,
                admin().forced().with_reason("buyer paid late"),
            )
            .await
            .unwrap();
        assert!(report.outcome.applied().unwrap().forced);
        assert_eq!(report.remaining_kg, Some(3));
        assert_eq!(remaining(&store).await, 3);
    }

    #[tokio::test]
    async fn test_non_cancel_move_leaves_volume_alone() {
        let (engine, _store) = reserved_box().await;

        let report = engine
            .change_order_status("p-1", OrderStatus::WaitingBoxClosure, admin())
            .await
            .unwrap();
        assert_eq!(report.remaining_kg, None);
    }

    #[tokio::test]
    async fn test_failed_volume_recompute_is_reported() {
        let (engine, store) = reserved_box().await;
        store.fail_writes_for("box-1").await;

        let report = engine
            .change_order_status("p-1", OrderStatus::Cancelled, admin())
            .await
            .unwrap();
        assert!(report.outcome.is_applied());
        assert_eq!(store.order_status("p-1").await, Some(OrderStatus::Cancelled));
        assert_eq!(report.remaining_kg, None);
        assert_eq!(report.propagation_failures.len(), 1);

        let failure = &report.propagation_failures[0];
        assert_eq!(failure.entity_type, EntityType::Box);
        assert_eq!(failure.entity_id, "box-1");
        assert_eq!(failure.target, "remaining_kg");
        assert_eq!(failure.kind, ErrorKind::Storage);
    }

    // =========================================================================
    // Propagation
    // =========================================================================

    #[tokio::test]
    async fn test_order_dispatch_moves_box_once_and_stops() {
        let (engine, store) = setup(
            BoxStatus::SupplierDeliveryReceived,
            &[
                ("p-1", OrderStatus::WaitingSupplier),
                ("p-2", OrderStatus::WaitingClientShipment),
                ("p-3", OrderStatus::WaitingClientShipment),
            ],
        )
        .await;

        let report = engine
            .change_order_status(
                "p-1",
                OrderStatus::DispatchingToClient,
                admin().forced().with_reason("picked straight from the truck"),
            )
            .await
            .unwrap();
        assert!(report.outcome.applied().unwrap().forced);
        assert!(report.box_was_updated);
        assert_eq!(
            report.box_transition.as_ref().map(|t| t.to),
            Some(BoxStatus::Dispatching)
        );
        assert!(report.propagation_failures.is_empty());
        assert_eq!(store.box_status("box-1").await, Some(BoxStatus::Dispatching));

        // The box write did not propagate back to the other orders.
        for id in ["p-2", "p-3"] {
            assert_eq!(
                store.order_status(id).await,
                Some(OrderStatus::WaitingClientShipment)
            );
            assert!(engine
                .fetch_audit_log(EntityType::Order, id)
                .await
                .unwrap()
                .is_empty());
        }
        let box_log = engine
            .fetch_audit_log(EntityType::Box, "box-1")
            .await
            .unwrap();
        assert_eq!(box_log.len(), 1);
        assert_eq!(store.log_entries().await.len(), 2);
        assert_eq!(engine.guard.in_flight(), 0);

        let second = engine
            .change_order_status("p-2", OrderStatus::DispatchingToClient, admin())
            .await
            .unwrap();
        assert!(second.outcome.is_applied());
        assert!(!second.box_was_updated);
        assert_eq!(
            engine
                .fetch_audit_log(EntityType::Box, "box-1")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_box_propagation_skips_cancelled_and_ahead_orders() {
        let (engine, store) = setup(
            BoxStatus::WaitingSupplierDelivery,
            &[
                ("behind", OrderStatus::WaitingSupplier),
                ("gone", OrderStatus::Cancelled),
            ],
        )
        .await;
        store
            .put_purchase(purchase("ahead", "box-1", 2, OrderStatus::DeliveredToClient, true))
            .await;

        let report = engine
            .change_box_status("box-1", BoxStatus::SupplierDeliveryReceived, admin())
            .await
            .unwrap();
        assert_eq!(report.orders_updated.len(), 1);
        assert_eq!(report.orders_updated[0].entity_id, "behind");
        assert!(!report.orders_updated[0].forced);
        assert_eq!(store.order_status("gone").await, Some(OrderStatus::Cancelled));
        assert_eq!(
            store.order_status("ahead").await,
            Some(OrderStatus::DeliveredToClient)
        );
    }

    #[tokio::test]
    async fn test_dispatching_box_leaves_orders_for_checklist() {
        let (engine, store) = setup(
            BoxStatus::SupplierDeliveryReceived,
            &[
                ("p-1", OrderStatus::WaitingClientShipment),
                ("p-2", OrderStatus::WaitingClientShipment),
            ],
        )
        .await;

        let report = engine
            .change_box_status("box-1", BoxStatus::Dispatching, admin().forced())
            .await
            .unwrap();
        assert!(report.orders_updated.is_empty());
        assert_eq!(report.awaiting_manual_dispatch, vec!["p-1", "p-2"]);
        for id in ["p-1", "p-2"] {
            assert_eq!(
                store.order_status(id).await,
                Some(OrderStatus::WaitingClientShipment)
            );
        }
    }

    #[tokio::test]
    async fn test_propagation_failure_is_reported_not_rolled_back() {
        let (engine, store) = setup(
            BoxStatus::WaitingSupplierOrder,
            &[
                ("p-1", OrderStatus::InPurchaseProcess),
                ("p-2", OrderStatus::InPurchaseProcess),
            ],
        )
        .await;
        store.fail_writes_for("p-2").await;

        let report = engine
            .change_box_status("box-1", BoxStatus::WaitingSupplierDelivery, admin())
            .await
            .unwrap();
        assert!(report.outcome.is_applied());
        assert_eq!(report.orders_updated.len(), 1);
        assert_eq!(report.propagation_failures.len(), 1);

        let failure = &report.propagation_failures[0];
        assert_eq!(failure.entity_id, "p-2");
        assert_eq!(failure.target, "waiting_supplier");
        assert_eq!(failure.kind, ErrorKind::Storage);
        assert_eq!(failure.to_error().kind(), ErrorKind::PropagationFailure);

        assert_eq!(
            store.box_status("box-1").await,
            Some(BoxStatus::WaitingSupplierDelivery)
        );
        assert_eq!(
            store.order_status("p-1").await,
            Some(OrderStatus::WaitingSupplier)
        );
        assert_eq!(
            store.order_status("p-2").await,
            Some(OrderStatus::InPurchaseProcess)
        );
    }

    #[tokio::test]
    async fn test_box_completes_exactly_once() {
        let (engine, store) = setup(
            BoxStatus::Dispatching,
            &[
                ("p-1", OrderStatus::DispatchingToClient),
                ("p-2", OrderStatus::DispatchingToClient),
                ("p-3", OrderStatus::DispatchingToClient),
            ],
        )
        .await;

        let (a, b, c) = tokio::join!(
            engine.change_order_status("p-1", OrderStatus::DeliveredToClient, admin()),
            engine.change_order_status("p-2", OrderStatus::DeliveredToClient, admin()),
            engine.change_order_status("p-3", OrderStatus::DeliveredToClient, admin()),
        );
        let reports = [a.unwrap(), b.unwrap(), c.unwrap()];
        assert!(reports.iter().all(|r| r.outcome.is_applied()));
        assert_eq!(reports.iter().filter(|r| r.box_was_updated).count(), 1);
        assert_eq!(store.box_status("box-1").await, Some(BoxStatus::Completed));

        let box_log = engine
            .fetch_audit_log(EntityType::Box, "box-1")
            .await
            .unwrap();
        assert_eq!(box_log.len(), 1);
        assert_eq!(
            box_log[0].reason.as_deref(),
            Some("Auto: all active purchases delivered (3/3)")
        );
    }

    // =========================================================================
    // Concurrency
    // =========================================================================

    #[tokio::test]
    async fn test_concurrent_identical_requests_commit_once() {
        let (engine, store) = setup(
            BoxStatus::WaitingPurchases,
            &[("p-1", OrderStatus::WaitingPayment)],
        )
        .await;

        let (first, second) = tokio::join!(
            engine.change_order_status("p-1", OrderStatus::WaitingBoxClosure, admin()),
            engine.change_order_status("p-1", OrderStatus::WaitingBoxClosure, admin()),
        );
        let outcomes = [first.unwrap().outcome, second.unwrap().outcome];
        assert_eq!(outcomes.iter().filter(|o| o.is_applied()).count(), 1);
        assert!(outcomes.contains(&TransitionOutcome::InProgress));

        assert_eq!(store.log_entries().await.len(), 1);
        assert_eq!(engine.guard.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_lost_writes_are_retried() {
        let (engine, store) = setup(
            BoxStatus::WaitingPurchases,
            &[("p-1", OrderStatus::WaitingPayment)],
        )
        .await;
        store.inject_conflicts("p-1", 2).await;

        let report = engine
            .change_order_status("p-1", OrderStatus::WaitingBoxClosure, admin())
            .await
            .unwrap();
        // Two lost writes bumped the version before the third succeeded.
        assert_eq!(report.outcome.applied().unwrap().version, 3);
        assert_eq!(store.log_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_conflict() {
        let (engine, store) = setup(
            BoxStatus::WaitingPurchases,
            &[("p-1", OrderStatus::WaitingPayment)],
        )
        .await;
        store.inject_conflicts("p-1", 3).await;

        let err = engine
            .change_order_status("p-1", OrderStatus::WaitingBoxClosure, admin())
            .await
            .unwrap_err();
        assert!(matches!(err, StatusError::Conflict { attempts: 3, .. }));
        assert!(err.is_retryable());
        assert_eq!(
            store.order_status("p-1").await,
            Some(OrderStatus::WaitingPayment)
        );
        assert!(store.log_entries().await.is_empty());
    }

    // =========================================================================
    // SQLite
    // =========================================================================

    #[tokio::test]
    async fn test_full_lifecycle_on_sqlite() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = StatusEngine::new(Arc::new(db), EngineSettings::default());

        let meat_box = engine
            .create_box(&NewBox {
                name: "Fraldinha".to_string(),
                brand: "Minerva".to_string(),
                price_per_kg_cents: 5490,
                cost_per_kg_cents: 3900,
                total_kg: 4,
                min_kg_per_person: 1,
                payment_type: PaymentType::Prepaid,
            })
            .await
            .unwrap();

        let mut ids = Vec::new();
        for user in ["ana", "bia"] {
            let update = engine
                .register_purchase(NewPurchase {
                    box_id: meat_box.id.clone(),
                    user_id: user.to_string(),
                    kg: 2,
                    payment_link: None,
                    payment_expires_at: None,
                })
                .await
                .unwrap();
            ids.push(update.purchase.id);
        }
        for id in &ids {
            engine.record_payment(id, PaymentStatus::Paid).await.unwrap();
        }

        let closed = engine.store().get_box(&meat_box.id).await.unwrap().unwrap();
        assert_eq!(closed.status, BoxStatus::WaitingSupplierOrder);
        assert_eq!(closed.remaining_kg, 0);

        engine
            .change_box_status(&meat_box.id, BoxStatus::WaitingSupplierDelivery, admin())
            .await
            .unwrap();
        engine
            .change_box_status(&meat_box.id, BoxStatus::SupplierDeliveryReceived, admin())
            .await
            .unwrap();
        for id in &ids {
            engine.mark_order_separated(id, "admin-1").await.unwrap();
            engine.confirm_delivery(id, "admin-1").await.unwrap();
        }

        let done = engine.store().get_box(&meat_box.id).await.unwrap().unwrap();
        assert_eq!(done.status, BoxStatus::Completed);

        let box_log = engine
            .fetch_audit_log(EntityType::Box, &meat_box.id)
            .await
            .unwrap();
        let codes: Vec<&str> = box_log.iter().map(|e| e.next_status.as_str()).collect();
        assert_eq!(
            codes,
            vec![
                "completed",
                "dispatching",
                "supplier_delivery_received",
                "waiting_supplier_delivery",
                "waiting_supplier_order",
            ]
        );
        assert!(box_log.iter().all(|e| !e.forced));

        let diagnosis = engine.diagnose_inconsistencies(&meat_box.id).await.unwrap();
        assert!(diagnosis.is_consistent());
    }
}
