//! # Closure Rule
//!
//! Decides whether a prepaid box has collected enough paid volume to leave
//! `waiting_purchases`. The engine applies the decision; this module only
//! looks at a snapshot.
//!
//! ```text
//!   prepaid? ──no──► Skip(Postpaid)
//!      │
//!   waiting_purchases? ──no──► Skip(NotCollecting)
//!      │
//!   total_kg > 0? ──no──► Skip(NoVolume)
//!      │
//!   reserved >= total && all active paid? ──no──► Pending
//!      │
//!      ▼
//!    Close
//! ```

use serde::{Deserialize, Serialize};

use crate::status::BoxStatus;
use crate::types::{MeatBox, PaymentType, Purchase};

/// Why the closure rule does not apply to a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Postpaid,
    NotCollecting,
    NoVolume,
}

/// Outcome of evaluating the closure rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ClosureDecision {
    /// The rule does not apply.
    Skip { reason: SkipReason },
    /// Still collecting volume or payments.
    Pending {
        reserved_kg: i64,
        total_kg: i64,
        unpaid: usize,
    },
    /// Fully reserved and paid: move the box to `waiting_supplier_order`.
    Close {
        reserved_kg: i64,
        total_kg: i64,
        purchase_count: usize,
    },
}

impl ClosureDecision {
    pub fn should_close(&self) -> bool {
        matches!(self, ClosureDecision::Close { .. })
    }

    /// Audit reason for an automatic closure.
    pub fn audit_reason(&self) -> Option<String> {
        match self {
            ClosureDecision::Close {
                reserved_kg,
                total_kg,
                purchase_count,
            } => Some(format!(
                "Auto: box fully reserved ({reserved_kg}/{total_kg} kg across {purchase_count} paid purchases)"
            )),
            _ => None,
        }
    }
}

/// Sum of kg over non-cancelled purchases.
pub fn reserved_kg(purchases: &[Purchase]) -> i64 {
    purchases
        .iter()
        .filter(|p| p.is_active())
        .map(|p| p.kg_purchased)
        .sum()
}

/// `max(0, total_kg − reserved)`.
pub fn remaining_kg(total_kg: i64, purchases: &[Purchase]) -> i64 {
    (total_kg - reserved_kg(purchases)).max(0)
}

/// Evaluates the closure rule for `meat_box` against its purchases.
pub fn evaluate_closure(meat_box: &MeatBox, purchases: &[Purchase]) -> ClosureDecision {
    if meat_box.payment_type != PaymentType::Prepaid {
        return ClosureDecision::Skip {
            reason: SkipReason::Postpaid,
        };
    }
    if meat_box.status != BoxStatus::WaitingPurchases {
        return ClosureDecision::Skip {
            reason: SkipReason::NotCollecting,
        };
    }
    if meat_box.total_kg <= 0 {
        return ClosureDecision::Skip {
            reason: SkipReason::NoVolume,
        };
    }

    let active: Vec<&Purchase> = purchases.iter().filter(|p| p.is_active()).collect();
    let reserved: i64 = active.iter().map(|p| p.kg_purchased).sum();
    let unpaid = active.iter().filter(|p| !p.is_paid()).count();

    if reserved >= meat_box.total_kg && unpaid == 0 {
        ClosureDecision::Close {
            reserved_kg: reserved,
            total_kg: meat_box.total_kg,
            purchase_count: active.len(),
        }
    } else {
        ClosureDecision::Pending {
            reserved_kg: reserved,
            total_kg: meat_box.total_kg,
            unpaid,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{meat_box, purchase};
    use super::*;
    use crate::status::OrderStatus;

    #[test]
    fn test_closes_when_fully_reserved_and_paid() {
        let b = meat_box(BoxStatus::WaitingPurchases, 10);
        let purchases = vec![
            purchase("a", 6, OrderStatus::WaitingBoxClosure, true),
            purchase("b", 4, OrderStatus::WaitingBoxClosure, true),
        ];
        let decision = evaluate_closure(&b, &purchases);
        assert_eq!(
            decision,
            ClosureDecision::Close {
                reserved_kg: 10,
                total_kg: 10,
                purchase_count: 2
            }
        );
        assert!(decision.audit_reason().unwrap().contains("10/10 kg"));
    }

    #[test]
    fn test_partial_volume_stays_pending() {
        let b = meat_box(BoxStatus::WaitingPurchases, 10);
        let purchases = vec![purchase("a", 6, OrderStatus::WaitingBoxClosure, true)];
        assert!(!evaluate_closure(&b, &purchases).should_close());
    }

    #[test]
    fn test_unpaid_purchase_blocks_closure() {
        let b = meat_box(BoxStatus::WaitingPurchases, 10);
        let purchases = vec![
            purchase("a", 6, OrderStatus::WaitingBoxClosure, true),
            purchase("b", 4, OrderStatus::WaitingPayment, false),
        ];
        assert_eq!(
            evaluate_closure(&b, &purchases),
            ClosureDecision::Pending {
                reserved_kg: 10,
                total_kg: 10,
                unpaid: 1
            }
        );
    }

    #[test]
    fn test_cancelled_purchases_are_ignored() {
        let b = meat_box(BoxStatus::WaitingPurchases, 10);
        let purchases = vec![
            purchase("a", 10, OrderStatus::WaitingBoxClosure, true),
            purchase("b", 4, OrderStatus::Cancelled, false),
        ];
        assert!(evaluate_closure(&b, &purchases).should_close());
        assert_eq!(reserved_kg(&purchases), 10);
        assert_eq!(remaining_kg(12, &purchases), 2);
        assert_eq!(remaining_kg(8, &purchases), 0);
    }

    #[test]
    fn test_skips_postpaid_and_advanced_boxes() {
        let mut b = meat_box(BoxStatus::WaitingPurchases, 10);
        b.payment_type = PaymentType::Postpaid;
        assert_eq!(
            evaluate_closure(&b, &[]),
            ClosureDecision::Skip {
                reason: SkipReason::Postpaid
            }
        );

        let b = meat_box(BoxStatus::WaitingSupplierOrder, 10);
        let purchases = vec![purchase("a", 10, OrderStatus::InPurchaseProcess, true)];
        assert_eq!(
            evaluate_closure(&b, &purchases),
            ClosureDecision::Skip {
                reason: SkipReason::NotCollecting
            }
        );

        let b = meat_box(BoxStatus::WaitingPurchases, 0);
        assert_eq!(
            evaluate_closure(&b, &[]),
            ClosureDecision::Skip {
                reason: SkipReason::NoVolume
            }
        );
    }
}
