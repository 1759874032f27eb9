//! # Box / Order Consistency
//!
//! The rule that relates an order's status to the status of its box, used
//! by propagation, diagnostics and batch repair.
//!
//! ## Expected Order Status per Box Status
//! ```text
//! ┌────────────────────────────┬──────────────────────────────────────────┐
//! │ Box                        │ Orders                                   │
//! ├────────────────────────────┼──────────────────────────────────────────┤
//! │ waiting_purchases          │ <= waiting_box_closure                   │
//! │ waiting_supplier_order     │ waiting_box_closure is behind            │
//! │                            │   (target in_purchase_process)           │
//! │                            │ <= in_purchase_process                   │
//! │ waiting_supplier_delivery  │ == waiting_supplier                      │
//! │ supplier_delivery_received │ == waiting_client_shipment               │
//! │ dispatching                │ waiting_client_shipment: manual dispatch │
//! │                            │ dispatching_to_client | delivered: ok    │
//! │ completed                  │ == delivered_to_client                   │
//! │ cancelled                  │ unconstrained                            │
//! └────────────────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Cancelled orders escape every check. Nothing here ever targets
//! `dispatching_to_client`: that edge belongs to the manual dispatch
//! checklist.

use std::fmt;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::status::{BoxStatus, Lifecycle, OrderStatus};
use crate::types::{MeatBox, Purchase};

// =============================================================================
// Alignment
// =============================================================================

/// Where an order stands relative to its box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAlignment {
    /// Consistent with the box.
    Aligned,
    /// Lagging; can be force-advanced to `expected`.
    Behind { expected: OrderStatus },
    /// Further along than the box allows. Never moved backwards.
    Ahead,
    /// Under a dispatching box, waiting for the manual checklist.
    AwaitingManualDispatch,
    /// Cancelled order or cancelled box.
    Skipped,
}

/// Assesses a single order against the status of its box.
pub fn assess_order(box_status: BoxStatus, order_status: OrderStatus) -> OrderAlignment {
    use OrderStatus as O;

    if order_status == O::Cancelled {
        return OrderAlignment::Skipped;
    }

    let exact = |expected: OrderStatus| {
        if order_status == expected {
            OrderAlignment::Aligned
        } else if is_before(order_status, expected) {
            OrderAlignment::Behind { expected }
        } else {
            OrderAlignment::Ahead
        }
    };

    match box_status {
        BoxStatus::WaitingPurchases => {
            if is_before(O::WaitingBoxClosure, order_status) {
                OrderAlignment::Ahead
            } else {
                OrderAlignment::Aligned
            }
        }
        BoxStatus::WaitingSupplierOrder => match order_status {
            O::WaitingBoxClosure => OrderAlignment::Behind {
                expected: O::InPurchaseProcess,
            },
            O::WaitingPayment | O::InPurchaseProcess => OrderAlignment::Aligned,
            _ => OrderAlignment::Ahead,
        },
        BoxStatus::WaitingSupplierDelivery => exact(O::WaitingSupplier),
        BoxStatus::SupplierDeliveryReceived => exact(O::WaitingClientShipment),
        BoxStatus::Dispatching => match order_status {
            O::WaitingClientShipment => OrderAlignment::AwaitingManualDispatch,
            O::DispatchingToClient | O::DeliveredToClient => OrderAlignment::Aligned,
            _ => OrderAlignment::Behind {
                expected: O::WaitingClientShipment,
            },
        },
        BoxStatus::Completed => exact(O::DeliveredToClient),
        BoxStatus::Cancelled => OrderAlignment::Skipped,
    }
}

/// Target status for box → order propagation, or `None` when the order
/// should stay where it is. Only ever moves an order forward.
///
/// ```rust
/// use meatbox_core::consistency::propagation_target;
/// use meatbox_core::status::{BoxStatus, OrderStatus};
///
/// assert_eq!(
///     propagation_target(BoxStatus::WaitingSupplierOrder, OrderStatus::WaitingBoxClosure),
///     Some(OrderStatus::InPurchaseProcess)
/// );
/// assert_eq!(
///     propagation_target(BoxStatus::Dispatching, OrderStatus::WaitingClientShipment),
///     None
/// );
/// ```
pub fn propagation_target(box_status: BoxStatus, order_status: OrderStatus) -> Option<OrderStatus> {
    let target = match box_status {
        BoxStatus::WaitingSupplierOrder if order_status == OrderStatus::WaitingBoxClosure => {
            OrderStatus::InPurchaseProcess
        }
        BoxStatus::WaitingSupplierDelivery => OrderStatus::WaitingSupplier,
        BoxStatus::SupplierDeliveryReceived => OrderStatus::WaitingClientShipment,
        BoxStatus::Completed => OrderStatus::DeliveredToClient,
        _ => return None,
    };

    (order_status != OrderStatus::Cancelled && is_before(order_status, target)).then_some(target)
}

/// True when `a` comes strictly before `b` in the order sequence.
fn is_before(a: OrderStatus, b: OrderStatus) -> bool {
    matches!((a.position(), b.position()), (Some(x), Some(y)) if x < y)
}

/// True when every active order is delivered, at least one active order
/// exists and the box is not already terminal.
pub fn box_should_complete(meat_box: &MeatBox, purchases: &[Purchase]) -> bool {
    if meat_box.status.is_terminal() {
        return false;
    }
    let mut active = purchases.iter().filter(|p| p.is_active()).peekable();
    active.peek().is_some() && active.all(|p| p.status == OrderStatus::DeliveredToClient)
}

// =============================================================================
// Diagnosis
// =============================================================================

/// One detected inconsistency between a box and its orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyIssue {
    OrderBehind {
        order_id: String,
        current: OrderStatus,
        expected: OrderStatus,
    },
    OrderAhead {
        order_id: String,
        current: OrderStatus,
        box_status: BoxStatus,
    },
    BoxShouldComplete {
        box_id: String,
        delivered: usize,
    },
}

impl fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyIssue::OrderBehind {
                order_id,
                current,
                expected,
            } => write!(f, "order {order_id} is {current}, expected {expected}"),
            ConsistencyIssue::OrderAhead {
                order_id,
                current,
                box_status,
            } => write!(f, "order {order_id} is {current}, ahead of box ({box_status})"),
            ConsistencyIssue::BoxShouldComplete { box_id, delivered } => write!(
                f,
                "box {box_id} should be completed ({delivered} active orders delivered)"
            ),
        }
    }
}

/// A fix an operator may apply. Diagnostics only suggest; batch repair
/// applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SuggestedFix {
    AdvanceOrder { order_id: String, to: OrderStatus },
    CompleteBox { box_id: String },
}

/// Result of checking a box against its orders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConsistencyReport {
    pub issues: Vec<ConsistencyIssue>,
    /// Orders under a dispatching box still waiting for the checklist.
    pub awaiting_manual_dispatch: Vec<String>,
    pub suggested_fixes: Vec<SuggestedFix>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Checks every order of `meat_box`. Applies nothing.
pub fn check_consistency(meat_box: &MeatBox, purchases: &[Purchase]) -> ConsistencyReport {
    let mut report = ConsistencyReport::default();

    for purchase in purchases {
        match assess_order(meat_box.status, purchase.status) {
            OrderAlignment::Behind { expected } => {
                report.issues.push(ConsistencyIssue::OrderBehind {
                    order_id: purchase.id.clone(),
                    current: purchase.status,
                    expected,
                });
                report.suggested_fixes.push(SuggestedFix::AdvanceOrder {
                    order_id: purchase.id.clone(),
                    to: expected,
                });
            }
            OrderAlignment::Ahead => report.issues.push(ConsistencyIssue::OrderAhead {
                order_id: purchase.id.clone(),
                current: purchase.status,
                box_status: meat_box.status,
            }),
            OrderAlignment::AwaitingManualDispatch => {
                report.awaiting_manual_dispatch.push(purchase.id.clone())
            }
            OrderAlignment::Aligned | OrderAlignment::Skipped => {}
        }
    }

    if box_should_complete(meat_box, purchases) {
        report.issues.push(ConsistencyIssue::BoxShouldComplete {
            box_id: meat_box.id.clone(),
            delivered: purchases.iter().filter(|p| p.is_active()).count(),
        });
        report.suggested_fixes.push(SuggestedFix::CompleteBox {
            box_id: meat_box.id.clone(),
        });
    }

    report
}

// =============================================================================
// Unit Tests
// =============================================================================
