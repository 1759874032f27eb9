//! # Manual Dispatch Checklist
//!
//! Per-order steps an operator ticks while a box is dispatching. These are
//! the only way an order reaches `dispatching_to_client`; box propagation
//! never moves an order there.
//!
//! ```text
//!  waiting_client_shipment
//!        │  mark_order_separated   (order_separated = true)
//!        ▼
//!  dispatching_to_client ──► box → dispatching (if not already)
//!        │  set_picked_up          (courier flag only)
//!        │  confirm_delivery
//!        ▼
//!  delivered_to_client  ──► box → completed when every active order is
//!                           delivered
//! ```

use chrono::Utc;
use tracing::info;

use meatbox_core::{CoreError, DispatchSteps, EntityType, OrderStatus, Purchase};

use crate::engine::{OrderTransitionReport, StatusEngine, TransitionRequest};
use crate::error::{StatusError, StatusResult};

impl StatusEngine {
    pub(crate) async fn load_purchase(&self, purchase_id: &str) -> StatusResult<Purchase> {
        self.store()
            .get_purchase(purchase_id)
            .await?
            .ok_or_else(|| StatusError::not_found(EntityType::Order, purchase_id))
    }

    /// Marks an order as separated and starts dispatching it.
    pub async fn mark_order_separated(
        &self,
        purchase_id: &str,
        actor_id: &str,
    ) -> StatusResult<OrderTransitionReport> {
        let purchase = self.load_purchase(purchase_id).await?;
        if !matches!(
            purchase.status,
            OrderStatus::WaitingClientShipment | OrderStatus::DispatchingToClient
        ) {
            return Err(CoreError::DispatchStep {
                order_id: purchase_id.to_string(),
                reason: format!("cannot separate an order in {}", purchase.status),
            }
            .into());
        }

        if !purchase.dispatch.order_separated {
            self.store().set_separated(purchase_id, Utc::now()).await?;
            info!(purchase_id, actor = actor_id, "Order separated");
        }

        self.change_order_status(
            purchase_id,
            OrderStatus::DispatchingToClient,
            TransitionRequest::by(actor_id).with_reason("Order separated for dispatch"),
        )
        .await
    }

    /// Records whether the courier picked the order up.
    pub async fn set_picked_up(
        &self,
        purchase_id: &str,
        picked_up: bool,
    ) -> StatusResult<DispatchSteps> {
        let purchase = self.load_purchase(purchase_id).await?;
        if !purchase.dispatch.order_separated {
            return Err(CoreError::DispatchStep {
                order_id: purchase_id.to_string(),
                reason: "order must be separated before pickup".to_string(),
            }
            .into());
        }

        self.store().set_picked_up(purchase_id, picked_up).await?;
        info!(purchase_id, picked_up, "Courier pickup updated");
        Ok(self.load_purchase(purchase_id).await?.dispatch)
    }

    /// Confirms delivery to the client.
    pub async fn confirm_delivery(
        &self,
        purchase_id: &str,
        actor_id: &str,
    ) -> StatusResult<OrderTransitionReport> {
        self.change_order_status(
            purchase_id,
            OrderStatus::DeliveredToClient,
            TransitionRequest::by(actor_id).with_reason("Delivery confirmed"),
        )
        .await
    }
}
