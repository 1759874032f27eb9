//! # Repository Module
//!
//! Database repository implementations for Meatbox.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  StatusEngine / intake / dispatch                                      │
//! │       │                                                                 │
//! │       │  db.purchases().list_by_box(box_id)                            │
//! │       ▼                                                                 │
//! │  PurchaseRepository                                                    │
//! │  ├── get_by_id(&self, id)                                              │
//! │  ├── list_by_box(&self, box_id)                                        │
//! │  ├── insert(&self, purchase)                                           │
//! │  └── write_status_if_unchanged(&self, id, next, version, log_entry)    │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`BoxRepository`](boxes::BoxRepository) - Boxes, soft delete, status writes
//! - [`PurchaseRepository`](purchases::PurchaseRepository) - Orders, payment, dispatch steps
//! - [`StatusLogRepository`](status_log::StatusLogRepository) - Append-only audit log

pub mod boxes;
pub mod purchases;
pub mod status_log;
