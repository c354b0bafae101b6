use async_trait::async_trait;
use common_observability::InventoryMetrics;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::sync::Arc;

use crate::error::{InventoryError, InventoryResult};
use crate::{InventoryStore, StockLevel};

// Reserve is read-compute-write over three keys, so it runs server-side:
// no other writer may observe the intermediate state.
const RESERVE_SCRIPT: &str = r#"
local available = redis.call('GET', KEYS[1])
if not available then
    return {-1, 0}
end
available = tonumber(available)
local existing = tonumber(redis.call('GET', KEYS[2]) or '0')
local net = tonumber(ARGV[1]) - existing
if net > available then
    return {-2, available}
end
redis.call('DECRBY', KEYS[1], net)
redis.call('SET', KEYS[2], ARGV[1])
redis.call('SADD', KEYS[3], ARGV[2])
return {0, available - net}
"#;

const MIGRATE_SCRIPT: &str = r#"
local qty = redis.call('GET', KEYS[1])
if not qty then
    return 0
end
local existing = tonumber(redis.call('GET', KEYS[2]) or '0')
redis.call('SET', KEYS[2], existing + tonumber(qty))
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[3], ARGV[1])
redis.call('SADD', KEYS[3], ARGV[2])
return tonumber(qty)
"#;

const RELEASE_SCRIPT: &str = r#"
local reserved = redis.call('GET', KEYS[2])
if not reserved then
    return 0
end
redis.call('INCRBY', KEYS[1], tonumber(reserved))
redis.call('DEL', KEYS[2])
redis.call('SREM', KEYS[3], ARGV[1])
return tonumber(reserved)
"#;

/// Redis-backed inventory store.
///
/// Key layout:
/// - `inventory:available:{item_id}`: integer counter
/// - `inventory:reserved:{item_id}:{holder}`: integer, no TTL (reservations
///   are bound to session lifecycle, not wall-clock)
/// - `inventory:reservations:{item_id}`: set of holder ids
#[derive(Clone)]
pub struct RedisInventoryStore {
    conn: ConnectionManager,
    reserve_script: Script,
    release_script: Script,
    migrate_script: Script,
    metrics: Arc<InventoryMetrics>,
}

fn available_key(item_id: &str) -> String {
    format!("inventory:available:{item_id}")
}

fn reservation_key(item_id: &str, holder: &str) -> String {
    format!("inventory:reserved:{item_id}:{holder}")
}

fn reservations_set_key(item_id: &str) -> String {
    format!("inventory:reservations:{item_id}")
}

impl RedisInventoryStore {
    pub fn new(conn: ConnectionManager, metrics: Arc<InventoryMetrics>) -> Self {
        Self {
            conn,
            reserve_script: Script::new(RESERVE_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
            migrate_script: Script::new(MIGRATE_SCRIPT),
            metrics,
        }
    }

    pub async fn connect(redis_url: &str, metrics: Arc<InventoryMetrics>) -> InventoryResult<Self> {
        let client = redis::Client::open(redis_url).map_err(InventoryError::store)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(InventoryError::store)?;
        Ok(Self::new(conn, metrics))
    }
}

#[async_trait]
impl InventoryStore for RedisInventoryStore {
    async fn sync_from_canonical(&self, items: &[StockLevel]) -> InventoryResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for item in items {
            pipe.set(available_key(&item.item_id), item.available).ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(InventoryError::store)?;
        tracing::info!(items = items.len(), "inventory synced from canonical store");
        Ok(())
    }

    async fn available(&self, item_id: &str) -> InventoryResult<u32> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn
            .get(available_key(item_id))
            .await
            .map_err(InventoryError::store)?;
        Ok(value.unwrap_or(0).max(0) as u32)
    }

    async fn reserve(&self, item_id: &str, qty: u32, holder: &str) -> InventoryResult<()> {
        let mut conn = self.conn.clone();
        let result: Vec<i64> = self
            .reserve_script
            .key(available_key(item_id))
            .key(reservation_key(item_id, holder))
            .key(reservations_set_key(item_id))
            .arg(qty)
            .arg(holder)
            .invoke_async(&mut conn)
            .await
            .map_err(InventoryError::store)?;

        match result.first().copied() {
            Some(0) => {
                self.metrics.reservations_total.inc();
                tracing::info!(
                    item_id,
                    holder,
                    qty,
                    remaining = result.get(1).copied().unwrap_or(0),
                    "inventory reserved"
                );
                Ok(())
            }
            Some(-1) => Err(InventoryError::UnknownItem(item_id.to_string())),
            Some(-2) => {
                self.metrics.oversell_rejected_total.inc();
                let available = result.get(1).copied().unwrap_or(0).max(0) as u32;
                Err(InventoryError::OutOfStock {
                    item_id: item_id.to_string(),
                    available,
                })
            }
            other => Err(InventoryError::Store(format!(
                "unexpected reserve script result: {other:?}"
            ))),
        }
    }

    async fn release(&self, item_id: &str, holder: &str) -> InventoryResult<u32> {
        let mut conn = self.conn.clone();
        let released: i64 = self
            .release_script
            .key(available_key(item_id))
            .key(reservation_key(item_id, holder))
            .key(reservations_set_key(item_id))
            .arg(holder)
            .invoke_async(&mut conn)
            .await
            .map_err(InventoryError::store)?;
        if released > 0 {
            self.metrics.releases_total.inc();
            tracing::info!(item_id, holder, released, "reservation released");
        }
        Ok(released.max(0) as u32)
    }

    async fn confirm(&self, item_id: &str, holder: &str) -> InventoryResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(reservation_key(item_id, holder))
            .ignore()
            .srem(reservations_set_key(item_id), holder)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(InventoryError::store)?;
        self.metrics.confirms_total.inc();
        tracing::info!(item_id, holder, "reservation confirmed");
        Ok(())
    }

    async fn migrate_holder(&self, item_id: &str, from: &str, to: &str) -> InventoryResult<()> {
        let mut conn = self.conn.clone();
        let moved: i64 = self
            .migrate_script
            .key(reservation_key(item_id, from))
            .key(reservation_key(item_id, to))
            .key(reservations_set_key(item_id))
            .arg(from)
            .arg(to)
            .invoke_async(&mut conn)
            .await
            .map_err(InventoryError::store)?;
        if moved > 0 {
            tracing::info!(item_id, from, to, qty = moved, "reservation migrated");
        }
        Ok(())
    }

    async fn reserved_total(&self, item_id: &str) -> InventoryResult<u32> {
        let holders = self.reservations_for(item_id).await?;
        let mut conn = self.conn.clone();
        let mut total = 0u32;
        for holder in holders {
            let qty: Option<i64> = conn
                .get(reservation_key(item_id, &holder))
                .await
                .map_err(InventoryError::store)?;
            total += qty.unwrap_or(0).max(0) as u32;
        }
        Ok(total)
    }

    async fn reservations_for(&self, item_id: &str) -> InventoryResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(reservations_set_key(item_id))
            .await
            .map_err(InventoryError::store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Requires a local Redis: docker run -d -p 6379:6379 redis:7-alpine

    async fn store() -> RedisInventoryStore {
        RedisInventoryStore::connect("redis://127.0.0.1:6379", Arc::new(InventoryMetrics::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn reserve_release_round_trip() {
        let store = store().await;
        let item = format!("itm-{}", std::process::id());
        store
            .sync_from_canonical(&[StockLevel {
                item_id: item.clone(),
                available: 5,
            }])
            .await
            .unwrap();

        store.reserve(&item, 2, "sess-a").await.unwrap();
        assert_eq!(store.available(&item).await.unwrap(), 3);
        assert_eq!(store.reserved_total(&item).await.unwrap(), 2);

        assert_eq!(store.release(&item, "sess-a").await.unwrap(), 2);
        assert_eq!(store.available(&item).await.unwrap(), 5);
        assert_eq!(store.reserved_total(&item).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn concurrent_reserves_never_oversell() {
        let store = store().await;
        let item = format!("itm-race-{}", std::process::id());
        store
            .sync_from_canonical(&[StockLevel {
                item_id: item.clone(),
                available: 1,
            }])
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            store.reserve(&item, 1, "sess-a"),
            store.reserve(&item, 1, "sess-b"),
        );
        assert!(a.is_ok() ^ b.is_ok(), "exactly one reserve must win");
        assert_eq!(store.available(&item).await.unwrap(), 0);
        assert_eq!(store.reserved_total(&item).await.unwrap(), 1);
    }
}
