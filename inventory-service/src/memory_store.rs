use async_trait::async_trait;
use common_observability::InventoryMetrics;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{InventoryError, InventoryResult};
use crate::{InventoryStore, StockLevel};

#[derive(Default)]
struct State {
    available: HashMap<String, u32>,
    // (item_id, holder) -> quantity
    reserved: HashMap<(String, String), u32>,
}

/// Mutex-serialised in-memory store. Backs tests and deployments running
/// with `INVENTORY_CACHE_ENABLED=false`; the single lock gives the same
/// per-item atomicity the Lua scripts give the Redis store.
#[derive(Clone, Default)]
pub struct InMemoryInventoryStore {
    inner: Arc<Mutex<State>>,
    metrics: Arc<InventoryMetrics>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: Arc<InventoryMetrics>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State::default())),
            metrics,
        }
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn sync_from_canonical(&self, items: &[StockLevel]) -> InventoryResult<()> {
        let mut state = self.inner.lock().await;
        for item in items {
            state.available.insert(item.item_id.clone(), item.available);
        }
        tracing::info!(items = items.len(), "inventory synced from canonical store");
        Ok(())
    }

    async fn available(&self, item_id: &str) -> InventoryResult<u32> {
        let state = self.inner.lock().await;
        Ok(state.available.get(item_id).copied().unwrap_or(0))
    }

    async fn reserve(&self, item_id: &str, qty: u32, holder: &str) -> InventoryResult<()> {
        let mut state = self.inner.lock().await;
        let Some(&available) = state.available.get(item_id) else {
            return Err(InventoryError::UnknownItem(item_id.to_string()));
        };
        let reservation = (item_id.to_string(), holder.to_string());
        let existing = state.reserved.get(&reservation).copied().unwrap_or(0);
        let net = i64::from(qty) - i64::from(existing);
        if net > i64::from(available) {
            self.metrics.oversell_rejected_total.inc();
            return Err(InventoryError::OutOfStock {
                item_id: item_id.to_string(),
                available,
            });
        }

        let updated = (i64::from(available) - net).max(0) as u32;
        state.available.insert(item_id.to_string(), updated);
        state.reserved.insert(reservation, qty);
        self.metrics.reservations_total.inc();
        tracing::info!(item_id, holder, qty, remaining = updated, "inventory reserved");
        Ok(())
    }

    async fn release(&self, item_id: &str, holder: &str) -> InventoryResult<u32> {
        let mut state = self.inner.lock().await;
        let reservation = (item_id.to_string(), holder.to_string());
        let Some(qty) = state.reserved.remove(&reservation) else {
            return Ok(0);
        };
        let available = state.available.get(item_id).copied().unwrap_or(0);
        state
            .available
            .insert(item_id.to_string(), available.saturating_add(qty));
        self.metrics.releases_total.inc();
        tracing::info!(item_id, holder, released = qty, "reservation released");
        Ok(qty)
    }

    async fn confirm(&self, item_id: &str, holder: &str) -> InventoryResult<()> {
        let mut state = self.inner.lock().await;
        state
            .reserved
            .remove(&(item_id.to_string(), holder.to_string()));
        self.metrics.confirms_total.inc();
        tracing::info!(item_id, holder, "reservation confirmed");
        Ok(())
    }

    async fn migrate_holder(&self, item_id: &str, from: &str, to: &str) -> InventoryResult<()> {
        let mut state = self.inner.lock().await;
        let Some(qty) = state
            .reserved
            .remove(&(item_id.to_string(), from.to_string()))
        else {
            return Ok(());
        };
        let target = (item_id.to_string(), to.to_string());
        let merged = state.reserved.get(&target).copied().unwrap_or(0) + qty;
        state.reserved.insert(target, merged);
        tracing::info!(item_id, from, to, qty, "reservation migrated");
        Ok(())
    }

    async fn reserved_total(&self, item_id: &str) -> InventoryResult<u32> {
        let state = self.inner.lock().await;
        Ok(state
            .reserved
            .iter()
            .filter(|((item, _), _)| item == item_id)
            .map(|(_, qty)| qty)
            .sum())
    }

    async fn reservations_for(&self, item_id: &str) -> InventoryResult<Vec<String>> {
        let state = self.inner.lock().await;
        Ok(state
            .reserved
            .keys()
            .filter(|(item, _)| item == item_id)
            .map(|(_, holder)| holder.clone())
            .collect())
    }
}
