//! # Closure Evaluator
//!
//! Closes a prepaid box once its volume is fully reserved and every active
//! purchase is paid. The rule itself lives in
//! [`meatbox_core::closure::evaluate_closure`]; this module loads the
//! snapshot and applies the decision through the engine.
//!
//! Closing is a valid forward edge (`waiting_purchases` →
//! `waiting_supplier_order`), so it is not forced. Box → order propagation
//! then moves `waiting_box_closure` orders to `in_purchase_process`.
//! Re-running against a box that already moved on is a no-op.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use meatbox_core::{evaluate_closure, BoxStatus, ClosureDecision, EntityType};

use crate::engine::{BoxTransitionReport, StatusEngine};
use crate::error::{StatusError, StatusResult};

/// One run of the closure evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosureRun {
    pub box_id: String,
    pub decision: ClosureDecision,
    /// Present when the decision was to close.
    pub transition: Option<BoxTransitionReport>,
}

impl ClosureRun {
    pub fn closed(&self) -> bool {
        self.transition
            .as_ref()
            .is_some_and(|report| report.outcome.is_applied())
    }
}

impl StatusEngine {
    /// Evaluates the closure rule for a box and applies it.
    pub async fn evaluate_closure(&self, box_id: &str) -> StatusResult<ClosureRun> {
        let meat_box = self
            .store()
            .get_box(box_id)
            .await?
            .ok_or_else(|| StatusError::not_found(EntityType::Box, box_id))?;
        let purchases = self.store().list_purchases(box_id).await?;

        let decision = evaluate_closure(&meat_box, &purchases);
        debug!(box_id, ?decision, "Closure evaluated");

        let transition = match decision.audit_reason() {
            Some(reason) => {
                let report = self
                    .change_box_status(
                        box_id,
                        BoxStatus::WaitingSupplierOrder,
                        self.system_request(reason),
                    )
                    .await?;
                if report.outcome.is_applied() {
                    info!(
                        box_id,
                        orders_advanced = report.orders_updated.len(),
                        "Box closed for supplier order"
                    );
                }
                Some(report)
            }
            None => None,
        };

        Ok(ClosureRun {
            box_id: box_id.to_string(),
            decision,
            transition,
        })
    }

    /// Runs the evaluator when enabled in the configuration.
    pub(crate) async fn maybe_close(&self, box_id: &str) -> StatusResult<Option<ClosureRun>> {
        if !self.settings().closure_enabled {
            debug!(box_id, "Closure evaluator disabled");
            return Ok(None);
        }
        self.evaluate_closure(box_id).await.map(Some)
    }
}
