//! Atomic inventory reservation engine.
//!
//! Stock is held as an available counter per item plus per-(item, holder)
//! reservations. Reservations are net-aware (re-reserving updates to an
//! absolute quantity), carry no TTL of their own, and are bound to session
//! lifecycle: logout or expiry releases them, checkout confirms them.
//!
//! Every mutating operation on one item is a single transactional unit in the
//! backing store, so concurrent carts can never oversell: at every quiescent
//! point `available + sum(reserved) == canonical stock`.

pub mod error;
pub mod memory_store;
pub mod redis_store;

pub use error::{InventoryError, InventoryResult};
pub use memory_store::InMemoryInventoryStore;
pub use redis_store::RedisInventoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Canonical stock level fed from the system of record on startup and on
/// menu refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLevel {
    pub item_id: String,
    pub available: u32,
}

/// Write-back snapshot for the canonical store's three-column bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct InventoryStatus {
    pub item_id: String,
    pub available: u32,
    pub reserved: u32,
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Overwrite available counts from the canonical store. Idempotent.
    async fn sync_from_canonical(&self, items: &[StockLevel]) -> InventoryResult<()>;

    /// Current available count; 0 for unknown items.
    async fn available(&self, item_id: &str) -> InventoryResult<u32>;

    /// `(available >= qty, available)`. Non-mutating.
    async fn check(&self, item_id: &str, qty: u32) -> InventoryResult<(bool, u32)> {
        let available = self.available(item_id).await?;
        Ok((available >= qty, available))
    }

    /// Reserve an absolute quantity for `holder`. Net-aware: an existing
    /// reservation is adjusted by the delta. Fails with `UnknownItem` for
    /// unsynced items and `OutOfStock` when the net increase exceeds the
    /// available count. Atomic with respect to all other writers of the item.
    async fn reserve(&self, item_id: &str, qty: u32, holder: &str) -> InventoryResult<()>;

    /// Return a holder's reservation to the available count. Idempotent;
    /// yields the quantity released (0 when no reservation existed).
    async fn release(&self, item_id: &str, holder: &str) -> InventoryResult<u32>;

    /// Drop the reservation without returning stock: the quantity has been
    /// consumed by checkout. Idempotent.
    async fn confirm(&self, item_id: &str, holder: &str) -> InventoryResult<()>;

    /// Move a reservation between holders without touching the available
    /// count. Used when a session authenticates and its holdings re-key from
    /// session id to user id. Quantities merge if the target already holds
    /// some. No-op when the source holds nothing.
    async fn migrate_holder(&self, item_id: &str, from: &str, to: &str) -> InventoryResult<()>;

    /// Sum of reservations over all holders.
    async fn reserved_total(&self, item_id: &str) -> InventoryResult<u32>;

    /// Holders with an active reservation for the item.
    async fn reservations_for(&self, item_id: &str) -> InventoryResult<Vec<String>>;

    /// Available plus reserved counts per item, for canonical write-back.
    async fn sync_snapshot(&self, item_ids: &[String]) -> InventoryResult<Vec<InventoryStatus>> {
        let mut snapshot = Vec::with_capacity(item_ids.len());
        for item_id in item_ids {
            snapshot.push(InventoryStatus {
                item_id: item_id.clone(),
                available: self.available(item_id).await?,
                reserved: self.reserved_total(item_id).await?,
            });
        }
        Ok(snapshot)
    }

    /// All-or-nothing batch reserve. On the first failure every reservation
    /// this batch already took is released before the error is returned.
    async fn reserve_batch(&self, items: &[(String, u32)], holder: &str) -> InventoryResult<()> {
        let mut taken: Vec<&str> = Vec::with_capacity(items.len());
        for (item_id, qty) in items {
            match self.reserve(item_id, *qty, holder).await {
                Ok(()) => taken.push(item_id),
                Err(err) => {
                    tracing::warn!(
                        holder,
                        item_id = %item_id,
                        reserved_so_far = taken.len(),
                        "batch reservation failed, rolling back"
                    );
                    for earlier in taken {
                        if let Err(release_err) = self.release(earlier, holder).await {
                            tracing::error!(
                                holder,
                                item_id = %earlier,
                                error = %release_err,
                                "failed to roll back batch reservation"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}
