//! # Status Taxonomy
//!
//! The two finite lifecycles of the system and their static transition graph.
//!
//! ## Box Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Box Lifecycle                                   │
//! │                                                                         │
//! │  waiting_purchases ──► waiting_supplier_order ──► waiting_supplier_     │
//! │         │                        │                 delivery             │
//! │         │                        │                    │                 │
//! │         └──────────┬─────────────┘                    ▼                 │
//! │                    ▼                        supplier_delivery_received  │
//! │               cancelled                               │                 │
//! │                                                       ▼                 │
//! │                                     dispatching ──► completed           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  waiting_payment ──► waiting_box_closure ──► in_purchase_process        │
//! │       ──► waiting_supplier ──► waiting_client_shipment                  │
//! │       ──► dispatching_to_client ──► delivered_to_client                 │
//! │                                                                         │
//! │  Every non-terminal order state may also move to `cancelled`.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Codes vs Labels
//! The persisted value is a stable snake_case code (`waiting_purchases`).
//! The Portuguese text shown to operators comes from [`Lifecycle::label`]
//! and is never stored.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::types::EntityType;

// =============================================================================
// Lifecycle Trait
// =============================================================================

/// Shared behaviour of [`BoxStatus`] and [`OrderStatus`].
///
/// Both lifecycles are a linear chain plus an absorbing `cancelled` state,
/// so the transition graph is fully described by [`Lifecycle::successor`]
/// and [`Lifecycle::is_cancellable`].
pub trait Lifecycle: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Which aggregate this status belongs to.
    const ENTITY: EntityType;

    /// The linear sequence, first to last, without `cancelled`.
    fn sequence() -> &'static [Self];

    /// The absorbing cancelled state.
    fn cancelled() -> Self;

    /// The single forward edge out of this state, if any.
    fn successor(self) -> Option<Self>;

    /// Whether an edge to the cancelled state exists from here.
    fn is_cancellable(self) -> bool;

    /// Stable persisted code.
    fn code(self) -> &'static str;

    /// Display text for operators.
    fn label(self) -> &'static str;

    /// Index in the linear sequence. `None` for the cancelled state.
    fn position(self) -> Option<usize> {
        Self::sequence().iter().position(|s| *s == self)
    }

    /// Terminal states have no outgoing edges.
    fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// The statically allowed next states.
    fn allowed_next(self) -> Vec<Self> {
        let mut next: Vec<Self> = self.successor().into_iter().collect();
        if self.is_cancellable() {
            next.push(Self::cancelled());
        }
        next
    }
}

/// Returns true iff `next` is a statically allowed successor of `current`.
///
/// ## Example
/// ```rust
/// use meatbox_core::status::{is_valid_transition, BoxStatus, OrderStatus};
///
/// assert!(is_valid_transition(BoxStatus::WaitingPurchases, BoxStatus::WaitingSupplierOrder));
/// assert!(is_valid_transition(BoxStatus::WaitingPurchases, BoxStatus::Cancelled));
/// assert!(!is_valid_transition(BoxStatus::Dispatching, BoxStatus::Cancelled));
/// assert!(is_valid_transition(OrderStatus::WaitingSupplier, OrderStatus::Cancelled));
/// ```
pub fn is_valid_transition<S: Lifecycle>(current: S, next: S) -> bool {
    current.allowed_next().contains(&next)
}

/// The allowed next states for display (status pickers, prompts).
pub fn valid_next_statuses<S: Lifecycle>(current: S) -> Vec<S> {
    current.allowed_next()
}

/// Resolves a raw stored value against a legacy lookup table.
fn normalize_with<S: Lifecycle>(raw: &str, legacy: &[(&str, S)], initial: S) -> S {
    let raw = raw.trim();

    if let Some(status) = S::sequence()
        .iter()
        .copied()
        .chain(std::iter::once(S::cancelled()))
        .find(|s| s.code() == raw || s.label() == raw)
    {
        return status;
    }

    legacy
        .iter()
        .find(|(old, _)| *old == raw)
        .map(|(_, status)| *status)
        .unwrap_or(initial)
}

// =============================================================================
// Box Status
// =============================================================================

/// Lifecycle of a bulk-purchase campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BoxStatus {
    /// Open for purchases. Initial state.
    WaitingPurchases,
    /// Volume collected, the supplier order is pending.
    WaitingSupplierOrder,
    /// Ordered from the supplier, waiting for delivery.
    WaitingSupplierDelivery,
    /// Supplier delivery is in the warehouse.
    SupplierDeliveryReceived,
    /// Orders are being dispatched. Reached only through order propagation.
    Dispatching,
    /// Every active order was delivered.
    Completed,
    /// Campaign aborted.
    Cancelled,
}

const BOX_SEQUENCE: [BoxStatus; 6] = [
    BoxStatus::WaitingPurchases,
    BoxStatus::WaitingSupplierOrder,
    BoxStatus::WaitingSupplierDelivery,
    BoxStatus::SupplierDeliveryReceived,
    BoxStatus::Dispatching,
    BoxStatus::Completed,
];

/// Enum strings used by records written before the current taxonomy.
const LEGACY_BOX_STATUSES: [(&str, BoxStatus); 7] = [
    ("awaiting_customer_purchases", BoxStatus::WaitingPurchases),
    ("awaiting_supplier_purchase", BoxStatus::WaitingSupplierOrder),
    ("awaiting_supplier_delivery", BoxStatus::WaitingSupplierDelivery),
    ("received_at_warehouse", BoxStatus::SupplierDeliveryReceived),
    ("dispatching_to_customers", BoxStatus::Dispatching),
    ("completed", BoxStatus::Completed),
    ("cancelled", BoxStatus::Cancelled),
];

impl BoxStatus {
    /// State every new box starts in.
    pub const fn initial() -> Self {
        BoxStatus::WaitingPurchases
    }

    /// Maps any stored value (current code, old display label, or legacy
    /// enum string) to a status. Unknown values map to the initial state.
    ///
    /// ```rust
    /// use meatbox_core::status::BoxStatus;
    ///
    /// assert_eq!(BoxStatus::normalize("received_at_warehouse"), BoxStatus::SupplierDeliveryReceived);
    /// assert_eq!(BoxStatus::normalize("Despachando"), BoxStatus::Dispatching);
    /// assert_eq!(BoxStatus::normalize("???"), BoxStatus::WaitingPurchases);
    /// ```
    pub fn normalize(raw: &str) -> Self {
        normalize_with(raw, &LEGACY_BOX_STATUSES, Self::initial())
    }

    /// Whether the box still accepts new purchases.
    pub const fn accepts_purchases(self) -> bool {
        matches!(self, BoxStatus::WaitingPurchases)
    }
}

impl Lifecycle for BoxStatus {
    const ENTITY: EntityType = EntityType::Box;

    fn sequence() -> &'static [Self] {
        &BOX_SEQUENCE
    }

    fn cancelled() -> Self {
        BoxStatus::Cancelled
    }

    fn successor(self) -> Option<Self> {
        match self {
            BoxStatus::WaitingPurchases => Some(BoxStatus::WaitingSupplierOrder),
            BoxStatus::WaitingSupplierOrder => Some(BoxStatus::WaitingSupplierDelivery),
            BoxStatus::WaitingSupplierDelivery => Some(BoxStatus::SupplierDeliveryReceived),
            BoxStatus::SupplierDeliveryReceived => Some(BoxStatus::Dispatching),
            BoxStatus::Dispatching => Some(BoxStatus::Completed),
            BoxStatus::Completed | BoxStatus::Cancelled => None,
        }
    }

    fn is_cancellable(self) -> bool {
        matches!(
            self,
            BoxStatus::WaitingPurchases | BoxStatus::WaitingSupplierOrder
        )
    }

    fn code(self) -> &'static str {
        match self {
            BoxStatus::WaitingPurchases => "waiting_purchases",
            BoxStatus::WaitingSupplierOrder => "waiting_supplier_order",
            BoxStatus::WaitingSupplierDelivery => "waiting_supplier_delivery",
            BoxStatus::SupplierDeliveryReceived => "supplier_delivery_received",
            BoxStatus::Dispatching => "dispatching",
            BoxStatus::Completed => "completed",
            BoxStatus::Cancelled => "cancelled",
        }
    }

    fn label(self) -> &'static str {
        match self {
            BoxStatus::WaitingPurchases => "Aguardando compras",
            BoxStatus::WaitingSupplierOrder => "Aguardando pedido ao fornecedor",
            BoxStatus::WaitingSupplierDelivery => "Aguardando entrega fornecedor",
            BoxStatus::SupplierDeliveryReceived => "Entrega do fornecedor recebida",
            BoxStatus::Dispatching => "Despachando",
            BoxStatus::Completed => "Finalizada",
            BoxStatus::Cancelled => "Cancelada",
        }
    }
}

impl Default for BoxStatus {
    fn default() -> Self {
        BoxStatus::initial()
    }
}

impl fmt::Display for BoxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for BoxStatus {
    type Err = ValidationError;

    /// Strict parse of a current code. Use [`BoxStatus::normalize`] for
    /// stored data that may predate the taxonomy.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BOX_SEQUENCE
            .iter()
            .copied()
            .chain(std::iter::once(BoxStatus::Cancelled))
            .find(|status| status.code() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "box_status".to_string(),
                allowed: BOX_SEQUENCE
                    .iter()
                    .chain(std::iter::once(&BoxStatus::Cancelled))
                    .map(|status| status.code().to_string())
                    .collect(),
            })
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// Lifecycle of one buyer's purchase within a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Prepaid order waiting for the buyer's payment. Initial state.
    WaitingPayment,
    /// Paid (or postpaid) and waiting for the box to close.
    WaitingBoxClosure,
    /// The box closed and the supplier order is being placed.
    InPurchaseProcess,
    /// Waiting for the supplier delivery.
    WaitingSupplier,
    /// In the warehouse, waiting to be shipped to the buyer.
    WaitingClientShipment,
    /// Separated and on the way. Set only by the manual dispatch checklist.
    DispatchingToClient,
    /// Delivered to the buyer.
    DeliveredToClient,
    /// Cancelled.
    Cancelled,
}

const ORDER_SEQUENCE: [OrderStatus; 7] = [
    OrderStatus::WaitingPayment,
    OrderStatus::WaitingBoxClosure,
    OrderStatus::InPurchaseProcess,
    OrderStatus::WaitingSupplier,
    OrderStatus::WaitingClientShipment,
    OrderStatus::DispatchingToClient,
    OrderStatus::DeliveredToClient,
];

const LEGACY_ORDER_STATUSES: [(&str, OrderStatus); 6] = [
    ("awaiting_box_closure", OrderStatus::WaitingBoxClosure),
    ("awaiting_payment", OrderStatus::WaitingPayment),
    ("awaiting_supplier", OrderStatus::WaitingSupplier),
    ("dispatching", OrderStatus::DispatchingToClient),
    ("delivered", OrderStatus::DeliveredToClient),
    ("cancelled", OrderStatus::Cancelled),
];

impl OrderStatus {
    /// State every new prepaid order starts in.
    pub const fn initial() -> Self {
        OrderStatus::WaitingPayment
    }

    /// Maps any stored value to a status. Unknown values map to the
    /// initial state.
    ///
    /// ```rust
    /// use meatbox_core::status::OrderStatus;
    ///
    /// assert_eq!(OrderStatus::normalize("delivered"), OrderStatus::DeliveredToClient);
    /// assert_eq!(OrderStatus::normalize("Em processo de compra"), OrderStatus::InPurchaseProcess);
    /// assert_eq!(OrderStatus::normalize(""), OrderStatus::WaitingPayment);
    /// ```
    pub fn normalize(raw: &str) -> Self {
        normalize_with(raw, &LEGACY_ORDER_STATUSES, Self::initial())
    }

    /// The three states an order may be in while its box is dispatching.
    pub const fn is_dispatch_substate(self) -> bool {
        matches!(
            self,
            OrderStatus::WaitingClientShipment
                | OrderStatus::DispatchingToClient
                | OrderStatus::DeliveredToClient
        )
    }
}

impl Lifecycle for OrderStatus {
    const ENTITY: EntityType = EntityType::Order;

    fn sequence() -> &'static [Self] {
        &ORDER_SEQUENCE
    }

    fn cancelled() -> Self {
        OrderStatus::Cancelled
    }

    fn successor(self) -> Option<Self> {
        match self {
            OrderStatus::WaitingPayment => Some(OrderStatus::WaitingBoxClosure),
            OrderStatus::WaitingBoxClosure => Some(OrderStatus::InPurchaseProcess),
            OrderStatus::InPurchaseProcess => Some(OrderStatus::WaitingSupplier),
            OrderStatus::WaitingSupplier => Some(OrderStatus::WaitingClientShipment),
            OrderStatus::WaitingClientShipment => Some(OrderStatus::DispatchingToClient),
            OrderStatus::DispatchingToClient => Some(OrderStatus::DeliveredToClient),
            OrderStatus::DeliveredToClient | OrderStatus::Cancelled => None,
        }
    }

    fn is_cancellable(self) -> bool {
        !matches!(
            self,
            OrderStatus::DeliveredToClient | OrderStatus::Cancelled
        )
    }

    fn code(self) -> &'static str {
        match self {
            OrderStatus::WaitingPayment => "waiting_payment",
            OrderStatus::WaitingBoxClosure => "waiting_box_closure",
            OrderStatus::InPurchaseProcess => "in_purchase_process",
            OrderStatus::WaitingSupplier => "waiting_supplier",
            OrderStatus::WaitingClientShipment => "waiting_client_shipment",
            OrderStatus::DispatchingToClient => "dispatching_to_client",
            OrderStatus::DeliveredToClient => "delivered_to_client",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    fn label(self) -> &'static str {
        match self {
            OrderStatus::WaitingPayment => "Aguardando pagamento cliente",
            OrderStatus::WaitingBoxClosure => "Aguardando fechamento da caixa",
            OrderStatus::InPurchaseProcess => "Em processo de compra",
            OrderStatus::WaitingSupplier => "Aguardando fornecedor - frigorífico",
            OrderStatus::WaitingClientShipment => "Aguardando envio para o cliente",
            OrderStatus::DispatchingToClient => "Despachando para o cliente",
            OrderStatus::DeliveredToClient => "Entregue ao cliente",
            OrderStatus::Cancelled => "Cancelado",
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::initial()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ORDER_SEQUENCE
            .iter()
            .copied()
            .chain(std::iter::once(OrderStatus::Cancelled))
            .find(|status| status.code() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "order_status".to_string(),
                allowed: ORDER_SEQUENCE
                    .iter()
                    .chain(std::iter::once(&OrderStatus::Cancelled))
                    .map(|status| status.code().to_string())
                    .collect(),
            })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
