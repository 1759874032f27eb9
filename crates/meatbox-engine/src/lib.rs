//! # meatbox-engine: Status Engine for Meatbox
//!
//! The single writer of box and order statuses. Every status change goes
//! through [`StatusEngine`], which validates the edge, writes it with an
//! optimistic version check, records it in the audit log and aligns the
//! related entities.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        meatbox-engine                                   │
//! │                                                                         │
//! │   admin UI / storefront                                                 │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   ┌──────────────────────────────────────────────────────────────┐     │
//! │   │                      StatusEngine                            │     │
//! │   │                                                              │     │
//! │   │  change_box_status ──► commit ──► propagate_to_orders        │     │
//! │   │  change_order_status ► commit ──► propagate_to_box           │     │
//! │   │                          │                                   │     │
//! │   │   intake    dispatch     │  guard (in-flight set)            │     │
//! │   │   closure   repair       │  audit (append-only log)          │     │
//! │   └──────────────────────────┼───────────────────────────────────┘     │
//! │                              ▼                                          │
//! │                    StatusStore (trait)                                  │
//! │                              │                                          │
//! │                 ┌────────────┴────────────┐                             │
//! │                 ▼                         ▼                             │
//! │        meatbox_db::Database         in-memory (tests)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`engine`] - Transition requests, commit path and propagation
//! - [`closure`] - Automatic closure of fully reserved prepaid boxes
//! - [`repair`] - Diagnostics and batch repair of a box and its orders
//! - [`dispatch`] - Manual dispatch checklist
//! - [`intake`] - Box creation, purchases and payments
//! - [`audit`] - Status audit log
//! - [`guard`] - Reentrancy guard
//! - [`store`] - Storage seam
//! - [`config`] - TOML configuration with environment overrides
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meatbox_core::BoxStatus;
//! use meatbox_engine::{EngineConfig, StatusEngine, TransitionRequest};
//!
//! let engine = StatusEngine::open(&EngineConfig::load_or_default(None)).await?;
//! let report = engine
//!     .change_box_status(
//!         &box_id,
//!         BoxStatus::WaitingSupplierDelivery,
//!         TransitionRequest::by("admin-1").with_reason("Supplier confirmed"),
//!     )
//!     .await?;
//! for failure in &report.propagation_failures {
//!     eprintln!("{}", failure.message);
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod audit;
pub mod closure;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod guard;
pub mod intake;
pub mod repair;
pub mod store;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use audit::AuditLog;
pub use closure::ClosureRun;
pub use config::{DatabaseSettings, EngineConfig, EngineSettings};
pub use engine::{
    BoxTransitionReport, OrderTransitionReport, PropagationFailure, StatusEngine, Transition,
    TransitionOutcome, TransitionRequest,
};
pub use error::{ErrorKind, StatusError, StatusResult};
pub use guard::TransitionGuard;
pub use intake::PurchaseUpdate;
pub use repair::{RepairAction, RepairError, RepairReport, RepairStep};
pub use store::StatusStore;
