//! In-memory [`StatusStore`] for engine tests, with write-failure,
//! log-failure and version-conflict injection.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use meatbox_core::{
    BoxStatus, MeatBox, OrderStatus, PaymentStatus, Purchase, StatusLogEntry,
};
use meatbox_db::{DbError, DbResult};

use super::StatusStore;

#[derive(Default)]
pub struct MemoryStore {
    boxes: RwLock<HashMap<String, MeatBox>>,
    purchases: RwLock<Vec<Purchase>>,
    logs: RwLock<Vec<StatusLogEntry>>,
    failing: RwLock<HashSet<String>>,
    failing_logs: RwLock<bool>,
    conflicts: RwLock<HashMap<String, u32>>,
    slipped_in: RwLock<Vec<Purchase>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_box(&self, meat_box: MeatBox) {
        self.boxes
            .write()
            .await
            .insert(meat_box.id.clone(), meat_box);
    }

    pub async fn put_purchase(&self, purchase: Purchase) {
        self.purchases.write().await.push(purchase);
    }


    /// Every status write for `id` fails until cleared, as does every
    /// remaining volume write when `id` is a box.
    pub async fn fail_writes_for(&self, id: &str) {
        self.failing.write().await.insert(id.to_string());
    }

    /// Every audit log append fails until cleared.
    pub async fn fail_log_appends(&self) {
        *self.failing_logs.write().await = true;
    }

    pub async fn clear_failures(&self) {
        self.failing.write().await.clear();
        *self.failing_logs.write().await = false;
    }

    /// `purchase` is stored just before the next purchase insert, as if a
    /// concurrent registration landed first.
    pub async fn land_before_next_insert(&self, purchase: Purchase) {
        self.slipped_in.write().await.push(purchase);
    }

    /// The next `times` status writes for `id` lose the version check, as if
    /// another writer got there first.
    pub async fn inject_conflicts(&self, id: &str, times: u32) {
        self.conflicts.write().await.insert(id.to_string(), times);
    }

    pub async fn box_status(&self, id: &str) -> Option<BoxStatus> {
        self.boxes.read().await.get(id).map(|b| b.status)
    }

    pub async fn order_status(&self, id: &str) -> Option<OrderStatus> {
        self.purchases
            .read()
            .await
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.status)
    }

    pub async fn log_entries(&self) -> Vec<StatusLogEntry> {
        self.logs.read().await.clone()
    }

    async fn check_injected(&self, id: &str) -> DbResult<bool> {
        if self.failing.read().await.contains(id) {
            return Err(DbError::QueryFailed(format!("injected failure for {id}")));
        }
        let mut conflicts = self.conflicts.write().await;
        match conflicts.get_mut(id) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn check_log_append(&self, entry: &StatusLogEntry) -> DbResult<()> {
        if *self.failing_logs.read().await {
            return Err(DbError::QueryFailed(format!(
                "injected log failure for {}",
                entry.entity_id
            )));
        }
        Ok(())
    }

    async fn push_log(&self, entry: &StatusLogEntry) {
        let mut entry = entry.clone();
        entry.reason = entry.reason.filter(|r| !r.trim().is_empty());
        self.logs.write().await.push(entry);
    }

    async fn with_purchase<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Purchase) -> T,
    ) -> DbResult<T> {
        let mut purchases = self.purchases.write().await;
        let purchase = purchases
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| DbError::not_found("purchase", id))?;
        purchase.updated_at = Utc::now();
        Ok(f(purchase))
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn get_box(&self, id: &str) -> DbResult<Option<MeatBox>> {
        tokio::task::yield_now().await;
        Ok(self.boxes.read().await.get(id).cloned())
    }

    async fn insert_box(&self, meat_box: &MeatBox) -> DbResult<MeatBox> {
        self.put_box(meat_box.clone()).await;
        Ok(meat_box.clone())
    }

    async fn write_box_status(
        &self,
        id: &str,
        next: BoxStatus,
        expected_version: i64,
        entry: &StatusLogEntry,
    ) -> DbResult<i64> {
        tokio::task::yield_now().await;
        let lose_race = self.check_injected(id).await?;

        let version = {
            let mut boxes = self.boxes.write().await;
            let meat_box = boxes
                .get_mut(id)
                .ok_or_else(|| DbError::not_found("box", id))?;
            if lose_race {
                meat_box.version += 1;
            }
            if meat_box.version != expected_version {
                return Err(DbError::conflict("box", id, expected_version));
            }
            self.check_log_append(entry).await?;
            meat_box.status = next;
            meat_box.version += 1;
            meat_box.updated_at = Utc::now();
            meat_box.version
        };

        self.push_log(entry).await;
        Ok(version)
    }

    async fn set_remaining_kg(&self, box_id: &str, remaining_kg: i64) -> DbResult<()> {
        if self.failing.read().await.contains(box_id) {
            return Err(DbError::QueryFailed(format!("injected failure for {box_id}")));
        }
        let mut boxes = self.boxes.write().await;
        let meat_box = boxes
            .get_mut(box_id)
            .ok_or_else(|| DbError::not_found("box", box_id))?;
        meat_box.remaining_kg = remaining_kg.max(0);
        Ok(())
    }

    async fn get_purchase(&self, id: &str) -> DbResult<Option<Purchase>> {
        tokio::task::yield_now().await;
        Ok(self
            .purchases
            .read()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn list_purchases(&self, box_id: &str) -> DbResult<Vec<Purchase>> {
        Ok(self
            .purchases
            .read()
            .await
            .iter()
            .filter(|p| p.box_id == box_id)
            .cloned()
            .collect())
    }

    async fn insert_purchase(&self, purchase: &Purchase) -> DbResult<Purchase> {
        if !self.boxes.read().await.contains_key(&purchase.box_id) {
            return Err(DbError::ForeignKeyViolation {
                message: format!("box {} does not exist", purchase.box_id),
            });
        }
        let earlier: Vec<Purchase> = self.slipped_in.write().await.drain(..).collect();
        for other in earlier {
            self.put_purchase(other).await;
        }
        self.put_purchase(purchase.clone()).await;
        Ok(purchase.clone())
    }

    async fn write_order_status(
        &self,
        id: &str,
        next: OrderStatus,
        expected_version: i64,
        entry: &StatusLogEntry,
    ) -> DbResult<i64> {
        tokio::task::yield_now().await;
        let lose_race = self.check_injected(id).await?;
        let log_result = self.check_log_append(entry).await;

        let version = self
            .with_purchase(id, |purchase| {
                if lose_race {
                    purchase.version += 1;
                }
                if purchase.version != expected_version {
                    return Err(DbError::conflict("purchase", id, expected_version));
                }
                log_result?;
                purchase.status = next;
                purchase.version += 1;
                Ok(purchase.version)
            })
            .await??;

        self.push_log(entry).await;
        Ok(version)
    }

    async fn set_payment_status(&self, id: &str, payment_status: PaymentStatus) -> DbResult<()> {
        self.with_purchase(id, |p| p.payment_status = payment_status)
            .await
    }

    async fn set_separated(&self, id: &str, at: DateTime<Utc>) -> DbResult<()> {
        self.with_purchase(id, |p| {
            p.dispatch.order_separated = true;
            p.dispatch.separated_at = Some(at);
        })
        .await
    }

    async fn set_picked_up(&self, id: &str, picked_up: bool) -> DbResult<()> {
        self.with_purchase(id, |p| {
            p.dispatch.picked_up_by_courier = picked_up;
            p.dispatch.picked_up_at = picked_up.then(Utc::now);
        })
        .await
    }

    async fn append_status_log(&self, entry: &StatusLogEntry) -> DbResult<()> {
        self.check_log_append(entry).await?;
        self.push_log(entry).await;
        Ok(())
    }

    async fn list_status_log(&self, entity_id: &str) -> DbResult<Vec<StatusLogEntry>> {
        Ok(self
            .logs
            .read()
            .await
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect())
    }
}
