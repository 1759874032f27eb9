//! # Reentrancy Guard
//!
//! Tracks which transitions are in flight so a propagation chain cannot
//! re-trigger itself (box → order → box → ...).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  key = (entity type, entity id, next status code)                       │
//! │                                                                         │
//! │  try_acquire(key)                                                       │
//! │       ├── key free  → insert, return ticket                             │
//! │       └── key taken → None (caller treats it as a no-op)                │
//! │                                                                         │
//! │  drop(ticket) → key removed, on every exit path                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The set belongs to one engine instance. Two engines never see each
//! other's keys.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use meatbox_core::EntityType;

type GuardKey = (EntityType, String, &'static str);

/// Set of in-flight transitions, shared by clones of one engine.
#[derive(Debug, Clone, Default)]
pub struct TransitionGuard {
    in_flight: Arc<Mutex<HashSet<GuardKey>>>,
}

impl TransitionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the key, or returns `None` if the same transition is already
    /// running.
    pub fn try_acquire(
        &self,
        entity: EntityType,
        id: &str,
        next_code: &'static str,
    ) -> Option<GuardTicket> {
        let key = (entity, id.to_string(), next_code);
        if !self.lock().insert(key.clone()) {
            return None;
        }
        Some(GuardTicket {
            key: Some(key),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Number of transitions currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<GuardKey>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held for the duration of one transition. Releases its key on drop.
#[derive(Debug)]
pub struct GuardTicket {
    key: Option<GuardKey>,
    in_flight: Arc<Mutex<HashSet<GuardKey>>>,
}

impl Drop for GuardTicket {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        }
    }
}
