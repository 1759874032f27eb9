//! # Batch Repair and Diagnostics
//!
//! Operator tools that bring a box and its orders back in line after a
//! partial propagation failure or a race between admin sessions.
//!
//! ## Repair Steps
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  run_batch_repair(box_id)                                               │
//! │                                                                         │
//! │  1. Volume     recompute remaining_kg from the active orders            │
//! │  2. Payments   paid orders still waiting_payment → waiting_box_closure  │
//! │  3. Closure    re-run the closure evaluator                             │
//! │  4. Diagnose   compare every active order with the box                  │
//! │  5. Align      force lagging orders forward, complete the box when      │
//! │                every active order is delivered                          │
//! │  6. Verify     re-check, leftovers become errors                        │
//! │                                                                         │
//! │  Each step records its own failures and the next step still runs.      │
//! │  Orders only ever move forward. Cancelled orders are never touched.    │
//! │  dispatching_to_client is never a repair target.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A second run with no changes in between produces no actions and no
//! errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use meatbox_core::{
    check_consistency, BoxStatus, ConsistencyReport, EntityType, OrderStatus, SuggestedFix,
};

use crate::closure::ClosureRun;
use crate::engine::{StatusEngine, Transition};
use crate::error::{StatusError, StatusResult};

// =============================================================================
// Report Types
// =============================================================================

/// Step of a repair run, used to attribute actions and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStep {
    Volume,
    Payments,
    Closure,
    Diagnose,
    Align,
    Verify,
}

impl fmt::Display for RepairStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepairStep::Volume => "volume",
            RepairStep::Payments => "payments",
            RepairStep::Closure => "closure",
            RepairStep::Diagnose => "diagnose",
            RepairStep::Align => "align",
            RepairStep::Verify => "verify",
        };
        f.write_str(s)
    }
}

/// A change applied by a repair run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairAction {
    RemainingCorrected {
        step: RepairStep,
        box_id: String,
        from: i64,
        to: i64,
    },
    OrderAdvanced {
        step: RepairStep,
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },
    BoxAdvanced {
        step: RepairStep,
        box_id: String,
        from: BoxStatus,
        to: BoxStatus,
    },
}

impl RepairAction {
    fn order(step: RepairStep, t: &Transition<OrderStatus>) -> Self {
        RepairAction::OrderAdvanced {
            step,
            order_id: t.entity_id.clone(),
            from: t.from,
            to: t.to,
        }
    }

    fn boxed(step: RepairStep, t: &Transition<BoxStatus>) -> Self {
        RepairAction::BoxAdvanced {
            step,
            box_id: t.entity_id.clone(),
            from: t.from,
            to: t.to,
        }
    }
}

impl fmt::Display for RepairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairAction::RemainingCorrected {
                step,
                box_id,
                from,
                to,
            } => write!(f, "[{step}] box {box_id}: remaining {from} kg -> {to} kg"),
            RepairAction::OrderAdvanced {
                step,
                order_id,
                from,
                to,
            } => write!(f, "[{step}] order {order_id}: {from} -> {to}"),
            RepairAction::BoxAdvanced {
                step,
                box_id,
                from,
                to,
            } => write!(f, "[{step}] box {box_id}: {from} -> {to}"),
        }
    }
}

/// A failure recorded during a repair run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairError {
    pub step: RepairStep,
    pub entity_id: Option<String>,
    pub message: String,
}

impl RepairError {
    fn new(step: RepairStep, entity_id: Option<&str>, message: impl Into<String>) -> Self {
        RepairError {
            step,
            entity_id: entity_id.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for RepairError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity_id {
            Some(id) => write!(f, "[{}] {}: {}", self.step, id, self.message),
            None => write!(f, "[{}] {}", self.step, self.message),
        }
    }
}

/// Outcome of [`StatusEngine::run_batch_repair`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairReport {
    pub box_id: String,
    /// True when no step recorded an error.
    pub success: bool,
    pub actions: Vec<RepairAction>,
    pub errors: Vec<RepairError>,
}

impl RepairReport {
    fn new(box_id: &str) -> Self {
        RepairReport {
            box_id: box_id.to_string(),
            success: false,
            actions: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, step: RepairStep, entity_id: Option<&str>, err: &StatusError) {
        error!(box_id = %self.box_id, %step, entity_id, error = %err, "Repair step failed");
        self.errors
            .push(RepairError::new(step, entity_id, err.to_string()));
    }
}

// =============================================================================
// Engine Operations
// =============================================================================

impl StatusEngine {
    /// Read-only check of a box against its orders. Lists the issues and
    /// the fixes batch repair would apply, applying nothing.
    pub async fn diagnose_inconsistencies(&self, box_id: &str) -> StatusResult<ConsistencyReport> {
        let meat_box = self
            .store()
            .get_box(box_id)
            .await?
            .ok_or_else(|| StatusError::not_found(EntityType::Box, box_id))?;
        let purchases = self.store().list_purchases(box_id).await?;

        let report = check_consistency(&meat_box, &purchases);
        if !report.is_consistent() {
            warn!(
                box_id,
                issues = report.issues.len(),
                fixes = report.suggested_fixes.len(),
                "Box is inconsistent with its orders"
            );
        }
        Ok(report)
    }

    /// Repairs one box and its orders. Never fails as a whole: every step
    /// records its own errors.
    pub async fn run_batch_repair(&self, box_id: &str) -> RepairReport {
        let mut report = RepairReport::new(box_id);
        info!(box_id, "Batch repair started");

        self.repair_volume(box_id, &mut report).await;
        self.repair_payments(box_id, &mut report).await;
        self.repair_closure(box_id, &mut report).await;

        match self.diagnose_inconsistencies(box_id).await {
            Ok(diagnosis) => self.repair_alignment(&diagnosis, &mut report).await,
            Err(e) => report.fail(RepairStep::Diagnose, Some(box_id), &e),
        }

        match self.diagnose_inconsistencies(box_id).await {
            Ok(diagnosis) => {
                for issue in &diagnosis.issues {
                    report.errors.push(RepairError::new(
                        RepairStep::Verify,
                        Some(box_id),
                        format!("still inconsistent: {issue}"),
                    ));
                }
            }
            Err(e) => report.fail(RepairStep::Verify, Some(box_id), &e),
        }

        report.success = report.errors.is_empty();
        info!(
            box_id,
            success = report.success,
            actions = report.actions.len(),
            errors = report.errors.len(),
            "Batch repair finished"
        );
        report
    }

    async fn repair_volume(&self, box_id: &str, report: &mut RepairReport) {
        let stored = match self.store().get_box(box_id).await {
            Ok(Some(meat_box)) => meat_box.remaining_kg,
            Ok(None) => {
                report.fail(
                    RepairStep::Volume,
                    Some(box_id),
                    &StatusError::not_found(EntityType::Box, box_id),
                );
                return;
            }
            Err(e) => {
                report.fail(RepairStep::Volume, Some(box_id), &StatusError::from(e));
                return;
            }
        };

        match self.recompute_remaining(box_id).await {
            Ok(remaining) if remaining != stored => {
                warn!(box_id, from = stored, to = remaining, "Remaining volume corrected");
                report.actions.push(RepairAction::RemainingCorrected {
                    step: RepairStep::Volume,
                    box_id: box_id.to_string(),
                    from: stored,
                    to: remaining,
                });
            }
            Ok(_) => {}
            Err(e) => report.fail(RepairStep::Volume, Some(box_id), &e),
        }
    }

    async fn repair_payments(&self, box_id: &str, report: &mut RepairReport) {
        let purchases = match self.store().list_purchases(box_id).await {
            Ok(purchases) => purchases,
            Err(e) => {
                report.fail(RepairStep::Payments, Some(box_id), &StatusError::from(e));
                return;
            }
        };

        for purchase in purchases
            .iter()
            .filter(|p| p.is_paid() && p.status == OrderStatus::WaitingPayment)
        {
            let request = self.system_request("Repair: payment confirmed");
            match self
                .change_order_status(&purchase.id, OrderStatus::WaitingBoxClosure, request)
                .await
            {
                Ok(result) => {
                    if let Some(t) = result.outcome.applied() {
                        report.actions.push(RepairAction::order(RepairStep::Payments, t));
                    }
                }
                Err(e) => report.fail(RepairStep::Payments, Some(&purchase.id), &e),
            }
        }
    }

    async fn repair_closure(&self, box_id: &str, report: &mut RepairReport) {
        let run: ClosureRun = match self.evaluate_closure(box_id).await {
            Ok(run) => run,
            Err(e) => {
                report.fail(RepairStep::Closure, Some(box_id), &e);
                return;
            }
        };

        let Some(transition) = run.transition else {
            return;
        };
        if let Some(t) = transition.outcome.applied() {
            report.actions.push(RepairAction::boxed(RepairStep::Closure, t));
        }
        for t in &transition.orders_updated {
            report.actions.push(RepairAction::order(RepairStep::Closure, t));
        }
        for failure in &transition.propagation_failures {
            report.fail(
                RepairStep::Closure,
                Some(&failure.entity_id),
                &failure.to_error(),
            );
        }
    }

    async fn repair_alignment(
        &self,
        diagnosis: &ConsistencyReport,
        report: &mut RepairReport,
    ) {
        for fix in &diagnosis.suggested_fixes {
            match fix {
                SuggestedFix::AdvanceOrder { order_id, to } => {
                    if *to == OrderStatus::DispatchingToClient {
                        continue;
                    }
                    let request = self
                        .system_request("Repair: aligned to box")
                        .forced();
                    match self.commit::<OrderStatus>(order_id, *to, &request, true).await {
                        Ok(Some(committed)) => report
                            .actions
                            .push(RepairAction::order(RepairStep::Align, &committed.transition)),
                        Ok(None) => {}
                        Err(e) if e.is_benign() => {}
                        Err(e) => report.fail(RepairStep::Align, Some(order_id), &e),
                    }
                }
                SuggestedFix::CompleteBox { box_id } => {
                    let request = self
                        .system_request("Repair: all active purchases delivered")
                        .forced();
                    match self
                        .commit::<BoxStatus>(box_id, BoxStatus::Completed, &request, true)
                        .await
                    {
                        Ok(Some(committed)) => report
                            .actions
                            .push(RepairAction::boxed(RepairStep::Align, &committed.transition)),
                        Ok(None) => {}
                        Err(e) if e.is_benign() => {}
                        Err(e) => report.fail(RepairStep::Align, Some(box_id), &e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use meatbox_core::closure::remaining_kg;
    use meatbox_core::{ConsistencyIssue, Lifecycle};

    use crate::config::EngineSettings;
    use crate::engine::TransitionRequest;
    use crate::store::memory::MemoryStore;
    use crate::store::StatusStore;
    use crate::testing::{meat_box, purchase};
    use crate::ErrorKind;

    use super::*;

    async fn setup(
        box_status: BoxStatus,
        total_kg: i64,
        orders: &[(&str, i64, OrderStatus, bool)],
    ) -> (StatusEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let purchases: Vec<_> = orders
            .iter()
            .map(|(id, kg, status, paid)| purchase(id, "box-1", *kg, *status, *paid))
            .collect();
        let mut meat_box = meat_box("box-1", box_status, total_kg);
        meat_box.remaining_kg = remaining_kg(total_kg, &purchases);
        store.put_box(meat_box).await;
        for p in purchases {
            store.put_purchase(p).await;
        }
        let engine = StatusEngine::new(store.clone(), EngineSettings::default());
        (engine, store)
    }

    #[tokio::test]
    async fn test_repair_aligns_lagging_orders_then_is_idempotent() {
        let (engine, store) = setup(
            BoxStatus::WaitingSupplierDelivery,
            10,
            &[
                ("p-1", 4, OrderStatus::InPurchaseProcess, true),
                ("p-2", 3, OrderStatus::WaitingBoxClosure, true),
                ("p-3", 3, OrderStatus::Cancelled, true),
            ],
        )
        .await;

        let first = engine.run_batch_repair("box-1").await;
        assert!(first.success, "{:?}", first.errors);
        assert_eq!(first.actions.len(), 2);
        assert_eq!(
            store.order_status("p-1").await,
            Some(OrderStatus::WaitingSupplier)
        );
        assert_eq!(
            store.order_status("p-2").await,
            Some(OrderStatus::WaitingSupplier)
        );
        assert_eq!(store.order_status("p-3").await, Some(OrderStatus::Cancelled));

        let second = engine.run_batch_repair("box-1").await;
        assert!(second.success);
        assert!(second.actions.is_empty());
        assert!(second.errors.is_empty());
    }

    #[tokio::test]
    async fn test_repair_corrects_stale_remaining_volume() {
        let (engine, store) = setup(
            BoxStatus::WaitingPurchases,
            10,
            &[
                ("p-1", 4, OrderStatus::WaitingPayment, false),
                ("p-2", 3, OrderStatus::Cancelled, false),
            ],
        )
        .await;
        let mut drifted = store.get_box("box-1").await.unwrap().unwrap();
        assert_eq!(drifted.remaining_kg, 6);
        drifted.remaining_kg = 3;
        store.put_box(drifted).await;

        let report = engine.run_batch_repair("box-1").await;
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(
            report.actions,
            vec![RepairAction::RemainingCorrected {
                step: RepairStep::Volume,
                box_id: "box-1".into(),
                from: 3,
                to: 6,
            }]
        );
        let fresh = store.get_box("box-1").await.unwrap().unwrap();
        assert_eq!(fresh.remaining_kg, 6);

        let again = engine.run_batch_repair("box-1").await;
        assert!(again.actions.is_empty());
    }

    #[tokio::test]
    async fn test_repair_reports_failed_volume_write() {
        let (engine, store) = setup(
            BoxStatus::WaitingPurchases,
            10,
            &[("p-1", 4, OrderStatus::WaitingPayment, false)],
        )
        .await;
        let mut drifted = store.get_box("box-1").await.unwrap().unwrap();
        drifted.remaining_kg = 10;
        store.put_box(drifted).await;
        store.fail_writes_for("box-1").await;

        let report = engine.run_batch_repair("box-1").await;
        assert!(!report.success);
        assert!(report
            .errors
            .iter()
            .any(|e| e.step == RepairStep::Volume && e.entity_id.as_deref() == Some("box-1")));
    }

    #[tokio::test]
    async fn test_repair_never_regresses_orders() {
        let (engine, store) = setup(
            BoxStatus::WaitingSupplierDelivery,
            10,
            &[
                ("ahead", 5, OrderStatus::WaitingClientShipment, true),
                ("done", 5, OrderStatus::DeliveredToClient, true),
            ],
        )
        .await;

        let report = engine.run_batch_repair("box-1").await;

        let before = |s: OrderStatus| s.position();
        assert_eq!(
            store.order_status("ahead").await,
            Some(OrderStatus::WaitingClientShipment)
        );
        assert_eq!(
            store.order_status("done").await,
            Some(OrderStatus::DeliveredToClient)
        );
        assert!(report.actions.iter().all(|a| match a {
            RepairAction::OrderAdvanced { from, to, .. } => before(*from) < before(*to),
            RepairAction::BoxAdvanced { .. } | RepairAction::RemainingCorrected { .. } => true,
        }));
        // The ahead order cannot be fixed without moving it back.
        assert!(!report.success);
        assert!(report
            .errors
            .iter()
            .all(|e| e.step == RepairStep::Verify));
    }

    #[tokio::test]
    async fn test_repair_confirms_payments_and_closes_box() {
        let (engine, store) = setup(
            BoxStatus::WaitingPurchases,
            10,
            &[
                ("p-1", 6, OrderStatus::WaitingPayment, true),
                ("p-2", 4, OrderStatus::WaitingBoxClosure, true),
            ],
        )
        .await;

        let report = engine.run_batch_repair("box-1").await;
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(
            store.box_status("box-1").await,
            Some(BoxStatus::WaitingSupplierOrder)
        );
        assert_eq!(
            store.order_status("p-1").await,
            Some(OrderStatus::InPurchaseProcess)
        );
        assert_eq!(
            store.order_status("p-2").await,
            Some(OrderStatus::InPurchaseProcess)
        );
        assert!(matches!(
            report.actions[0],
            RepairAction::OrderAdvanced {
                step: RepairStep::Payments,
                to: OrderStatus::WaitingBoxClosure,
                ..
            }
        ));
        assert!(report.actions.iter().any(|a| matches!(
            a,
            RepairAction::BoxAdvanced {
                step: RepairStep::Closure,
                to: BoxStatus::WaitingSupplierOrder,
                ..
            }
        )));

        let again = engine.run_batch_repair("box-1").await;
        assert!(again.actions.is_empty());
        assert!(again.errors.is_empty());
    }

    #[tokio::test]
    async fn test_repair_completes_box_when_all_delivered() {
        let (engine, store) = setup(
            BoxStatus::Dispatching,
            6,
            &[
                ("p-1", 3, OrderStatus::DeliveredToClient, true),
                ("p-2", 3, OrderStatus::DeliveredToClient, true),
                ("p-3", 2, OrderStatus::Cancelled, false),
            ],
        )
        .await;

        let report = engine.run_batch_repair("box-1").await;
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(store.box_status("box-1").await, Some(BoxStatus::Completed));

        let log = engine
            .fetch_audit_log(EntityType::Box, "box-1")
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert!(!log[0].forced);
        assert_eq!(log[0].next_status, BoxStatus::Completed.code());
    }

    #[tokio::test]
    async fn test_repair_isolates_failing_order() {
        let (engine, store) = setup(
            BoxStatus::SupplierDeliveryReceived,
            9,
            &[
                ("p-1", 3, OrderStatus::WaitingSupplier, true),
                ("p-2", 3, OrderStatus::WaitingSupplier, true),
                ("p-3", 3, OrderStatus::InPurchaseProcess, true),
            ],
        )
        .await;
        store.fail_writes_for("p-2").await;

        let report = engine.run_batch_repair("box-1").await;
        assert!(!report.success);
        assert_eq!(
            store.order_status("p-1").await,
            Some(OrderStatus::WaitingClientShipment)
        );
        assert_eq!(
            store.order_status("p-3").await,
            Some(OrderStatus::WaitingClientShipment)
        );
        assert_eq!(
            store.order_status("p-2").await,
            Some(OrderStatus::WaitingSupplier)
        );
        assert!(report
            .errors
            .iter()
            .any(|e| e.step == RepairStep::Align && e.entity_id.as_deref() == Some("p-2")));

        store.clear_failures().await;
        let retry = engine.run_batch_repair("box-1").await;
        assert!(retry.success, "{:?}", retry.errors);
        assert_eq!(retry.actions.len(), 1);
    }

    #[tokio::test]
    async fn test_repair_leaves_manual_dispatch_alone() {
        let (engine, store) = setup(
            BoxStatus::Dispatching,
            6,
            &[
                ("waiting", 3, OrderStatus::WaitingClientShipment, true),
                ("behind", 3, OrderStatus::WaitingSupplier, true),
            ],
        )
        .await;

        let report = engine.run_batch_repair("box-1").await;
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(
            store.order_status("waiting").await,
            Some(OrderStatus::WaitingClientShipment)
        );
        assert_eq!(
            store.order_status("behind").await,
            Some(OrderStatus::WaitingClientShipment)
        );
    }

    #[tokio::test]
    async fn test_diagnose_reports_manual_dispatch_without_issue() {
        let (engine, store) = setup(
            BoxStatus::SupplierDeliveryReceived,
            6,
            &[
                ("p-1", 3, OrderStatus::WaitingClientShipment, true),
                ("p-2", 3, OrderStatus::WaitingClientShipment, true),
            ],
        )
        .await;

        let report = engine
            .change_box_status(
                "box-1",
                BoxStatus::Dispatching,
                TransitionRequest::by("admin").forced().with_reason("truck loaded"),
            )
            .await
            .unwrap();
        assert!(report.orders_updated.is_empty());
        assert_eq!(report.awaiting_manual_dispatch.len(), 2);
        assert_eq!(
            store.order_status("p-1").await,
            Some(OrderStatus::WaitingClientShipment)
        );

        let diagnosis = engine.diagnose_inconsistencies("box-1").await.unwrap();
        assert!(diagnosis.is_consistent());
        assert_eq!(diagnosis.awaiting_manual_dispatch, vec!["p-1", "p-2"]);
        assert!(diagnosis.suggested_fixes.is_empty());
    }

    #[tokio::test]
    async fn test_diagnose_suggests_without_applying() {
        let (engine, store) = setup(
            BoxStatus::Completed,
            4,
            &[("p-1", 4, OrderStatus::WaitingClientShipment, true)],
        )
        .await;

        let diagnosis = engine.diagnose_inconsistencies("box-1").await.unwrap();
        assert_eq!(
            diagnosis.issues,
            vec![ConsistencyIssue::OrderBehind {
                order_id: "p-1".into(),
                current: OrderStatus::WaitingClientShipment,
                expected: OrderStatus::DeliveredToClient,
            }]
        );
        assert_eq!(
            diagnosis.suggested_fixes,
            vec![SuggestedFix::AdvanceOrder {
                order_id: "p-1".into(),
                to: OrderStatus::DeliveredToClient,
            }]
        );
        assert_eq!(
            store.order_status("p-1").await,
            Some(OrderStatus::WaitingClientShipment)
        );
    }

    #[tokio::test]
    async fn test_diagnose_missing_box() {
        let engine = StatusEngine::new(Arc::new(MemoryStore::new()), EngineSettings::default());
        let err = engine.diagnose_inconsistencies("ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntityNotFound);

        let report = engine.run_batch_repair("ghost").await;
        assert!(!report.success);
        assert!(report.actions.is_empty());
    }
}
