//! # meatbox-core: Pure Domain Logic for Meatbox
//!
//! This crate holds the status lifecycles and the rules that tie a box to
//! its orders, as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Meatbox Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Admin console / storefront (UI)                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    meatbox-engine                               │   │
//! │  │    StatusEngine, closure, batch repair, dispatch, intake        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ meatbox-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │  status   │  │   types   │  │  closure  │  │consistency│  │   │
//! │  │   │ BoxStatus │  │  MeatBox  │  │  reserved │  │  expected │  │   │
//! │  │   │OrderStatus│  │ Purchase  │  │  all paid │  │  statuses │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO ASYNC • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  meatbox-db (Database Layer)                    │   │
//! │  │          SQLite queries, migrations, repositories               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`status`] - Box and order lifecycles, transition graph, legacy values
//! - [`types`] - Domain types (MeatBox, Purchase, StatusLogEntry)
//! - [`money`] - Integer money in centavos
//! - [`closure`] - Automatic closure rule for prepaid boxes
//! - [`consistency`] - Expected order status for a given box status
//! - [`validation`] - Purchase quantity and box input checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use meatbox_core::status::{is_valid_transition, valid_next_statuses, OrderStatus};
//!
//! assert!(is_valid_transition(OrderStatus::WaitingPayment, OrderStatus::WaitingBoxClosure));
//! assert!(!is_valid_transition(OrderStatus::WaitingPayment, OrderStatus::WaitingSupplier));
//! assert!(valid_next_statuses(OrderStatus::DeliveredToClient).is_empty());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod closure;
pub mod consistency;
pub mod error;
pub mod money;
pub mod status;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use closure::{evaluate_closure, ClosureDecision};
pub use consistency::{check_consistency, ConsistencyIssue, ConsistencyReport, SuggestedFix};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use status::{is_valid_transition, valid_next_statuses, BoxStatus, Lifecycle, OrderStatus};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Prefix of generated order numbers.
pub const ORDER_NUMBER_PREFIX: &str = "GM";

/// Maximum length of box names and brands.
pub const MAX_NAME_LEN: usize = 200;
