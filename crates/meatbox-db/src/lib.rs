//! # meatbox-db: Database Layer for Meatbox
//!
//! This crate provides database access for boxes, purchases and the status
//! audit log. It uses SQLite with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Meatbox Data Flow                                │
//! │                                                                         │
//! │  StatusEngine (meatbox-engine)                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    meatbox-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ BoxRepo       │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ PurchaseRepo  │    │ 001_init.sql │  │   │
//! │  │   │               │    │ StatusLogRepo │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meatbox_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("meatbox.db")).await?;
//! let open = db.boxes().list_open().await?;
//! let purchases = db.purchases().list_by_box(&open[0].id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::boxes::{generate_box_id, BoxRepository};
pub use repository::purchases::{generate_purchase_id, PurchaseRepository};
pub use repository::status_log::StatusLogRepository;
