//! # Box and Purchase Intake
//!
//! Creating boxes, registering purchases and recording payments. Every
//! change to reserved volume recomputes `remaining_kg` and gives the
//! closure evaluator a chance to close the box.
//!
//! ```text
//!  register_purchase ─┐
//!  record_payment ────┼──► recompute remaining_kg ──► maybe_close(box)
//!  cancel_purchase ───┘
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use meatbox_core::closure::remaining_kg;
use meatbox_core::validation::{validate_actor_id, validate_new_box, validate_purchase_quantity};
use meatbox_core::{
    CoreError, DispatchSteps, EntityType, MeatBox, NewBox, NewPurchase, OrderStatus,
    PaymentStatus, PaymentType, Purchase,
};

use crate::closure::ClosureRun;
use crate::engine::{OrderTransitionReport, StatusEngine, TransitionRequest};
use crate::error::{StatusError, StatusResult};

/// Result of a purchase-side change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseUpdate {
    pub purchase: Purchase,
    /// Status change of the purchase itself, when one happened.
    pub transition: Option<OrderTransitionReport>,
    /// Remaining volume of the box after the change, when it was recomputed.
    pub remaining_kg: Option<i64>,
    /// Closure evaluation triggered by the change.
    pub closure: Option<ClosureRun>,
}

impl StatusEngine {
    /// Validates and stores a new box in `waiting_purchases`.
    pub async fn create_box(&self, input: &NewBox) -> StatusResult<MeatBox> {
        validate_new_box(input)?;

        let meat_box = MeatBox::from_new(Uuid::new_v4().to_string(), input, Utc::now());
        let stored = self.store().insert_box(&meat_box).await?;
        info!(box_id = %stored.id, total_kg = stored.total_kg, "Box created");
        Ok(stored)
    }

    /// Reserves volume in a box for a buyer.
    ///
    /// Prepaid purchases start unpaid in `waiting_payment`. Postpaid
    /// purchases start in `waiting_box_closure`, settled on delivery.
    ///
    /// The volume check and the insert are separate store calls, so a
    /// concurrent registration can land in between. The insert is checked
    /// again afterwards: earlier purchases keep their volume and one that no
    /// longer fits is cancelled and rejected with `InsufficientVolume`.
    pub async fn register_purchase(&self, input: NewPurchase) -> StatusResult<PurchaseUpdate> {
        validate_actor_id(&input.user_id)?;

        let mut meat_box = self
            .store()
            .get_box(&input.box_id)
            .await?
            .ok_or_else(|| StatusError::not_found(EntityType::Box, &input.box_id))?;
        let existing = self.store().list_purchases(&input.box_id).await?;
        meat_box.remaining_kg = remaining_kg(meat_box.total_kg, &existing);
        validate_purchase_quantity(&meat_box, input.kg)?;

        let (status, payment_status) = match meat_box.payment_type {
            PaymentType::Prepaid => (OrderStatus::initial(), PaymentStatus::Pending),
            PaymentType::Postpaid => (OrderStatus::WaitingBoxClosure, PaymentStatus::Paid),
        };

        let now = Utc::now();
        let purchase = Purchase {
            id: Uuid::new_v4().to_string(),
            order_number: Purchase::order_number_for(now.timestamp_millis()),
            box_id: input.box_id.clone(),
            user_id: input.user_id,
            kg_purchased: input.kg,
            total_amount_cents: meat_box.price_per_kg().per_kg(input.kg).cents(),
            status,
            payment_status,
            payment_link: input.payment_link,
            payment_expires_at: input.payment_expires_at,
            dispatch: DispatchSteps::default(),
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let stored = self.store().insert_purchase(&purchase).await?;
        info!(
            purchase_id = %stored.id,
            order_number = %stored.order_number,
            box_id = %stored.box_id,
            kg = stored.kg_purchased,
            "Purchase registered"
        );
        self.reject_oversell(&meat_box, &stored).await?;

        let remaining = self.recompute_remaining(&stored.box_id).await?;
        let closure = self.maybe_close(&stored.box_id).await?;
        let purchase = self.load_purchase(&stored.id).await?;

        Ok(PurchaseUpdate {
            purchase,
            transition: None,
            remaining_kg: Some(remaining),
            closure,
        })
    }

    /// Stores a payment result. A confirmed payment moves the order on to
    /// `waiting_box_closure`.
    pub async fn record_payment(
        &self,
        purchase_id: &str,
        payment_status: PaymentStatus,
    ) -> StatusResult<PurchaseUpdate> {
        let purchase = self.load_purchase(purchase_id).await?;
        self.store()
            .set_payment_status(purchase_id, payment_status)
            .await?;
        info!(purchase_id, ?payment_status, "Payment status recorded");

        let transition = if payment_status == PaymentStatus::Paid
            && purchase.status == OrderStatus::WaitingPayment
        {
            Some(
                self.change_order_status(
                    purchase_id,
                    OrderStatus::WaitingBoxClosure,
                    self.system_request("Payment confirmed"),
                )
                .await?,
            )
        } else {
            None
        };

        let closure = self.maybe_close(&purchase.box_id).await?;
        Ok(PurchaseUpdate {
            purchase: self.load_purchase(purchase_id).await?,
            transition,
            remaining_kg: None,
            closure,
        })
    }

    /// Cancels a purchase and releases its volume.
    pub async fn cancel_purchase(
        &self,
        purchase_id: &str,
        actor_id: &str,
        reason: Option<String>,
    ) -> StatusResult<PurchaseUpdate> {
        let mut request = TransitionRequest::by(actor_id);
        request.reason = reason;

        let transition = self
            .change_order_status(purchase_id, OrderStatus::Cancelled, request)
            .await?;
        let purchase = self.load_purchase(purchase_id).await?;

        let remaining = match transition.remaining_kg {
            Some(remaining) => remaining,
            None => self.recompute_remaining(&purchase.box_id).await?,
        };
        let closure = self.maybe_close(&purchase.box_id).await?;

        Ok(PurchaseUpdate {
            purchase,
            transition: Some(transition),
            remaining_kg: Some(remaining),
            closure,
        })
    }

    async fn reject_oversell(&self, meat_box: &MeatBox, stored: &Purchase) -> StatusResult<()> {
        let purchases = self.store().list_purchases(&stored.box_id).await?;
        let ahead: i64 = purchases
            .iter()
            .take_while(|p| p.id != stored.id)
            .filter(|p| p.is_active())
            .map(|p| p.kg_purchased)
            .sum();
        let available = (meat_box.total_kg - ahead).max(0);
        if stored.kg_purchased <= available {
            return Ok(());
        }

        warn!(
            purchase_id = %stored.id,
            box_id = %stored.box_id,
            kg = stored.kg_purchased,
            available,
            "Box oversold by a concurrent registration, cancelling purchase"
        );
        self.change_order_status(
            &stored.id,
            OrderStatus::Cancelled,
            self.system_request("Oversold: volume taken by an earlier purchase"),
        )
        .await?;

        Err(CoreError::InsufficientVolume {
            box_id: stored.box_id.clone(),
            available,
            requested: stored.kg_purchased,
        }
        .into())
    }

    /// Recomputes and stores `remaining_kg` from the active purchases.
    pub async fn recompute_remaining(&self, box_id: &str) -> StatusResult<i64> {
        let meat_box = self
            .store()
            .get_box(box_id)
            .await?
            .ok_or_else(|| StatusError::not_found(EntityType::Box, box_id))?;
        let purchases = self.store().list_purchases(box_id).await?;

        let remaining = remaining_kg(meat_box.total_kg, &purchases);
        if remaining != meat_box.remaining_kg {
            self.store().set_remaining_kg(box_id, remaining).await?;
        }
        Ok(remaining)
    }
}
