use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_money::Money;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{CartError, CartResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    DineIn,
    Takeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub item_id: String,
    pub name: String,
    pub price: Money,
    pub quantity: u32,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub session_id: String,
    pub items: Vec<CartItem>,
    pub order_type: Option<OrderType>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn empty(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            items: Vec::new(),
            order_type: None,
            updated_at: Utc::now(),
        }
    }

    pub fn subtotal(&self) -> Money {
        self.items
            .iter()
            .map(|item| item.price.line_total(item.quantity))
            .sum()
    }

    pub fn quantity_of(&self, item_id: &str) -> u32 {
        self.items
            .iter()
            .find(|item| item.item_id == item_id)
            .map(|item| item.quantity)
            .unwrap_or(0)
    }
}

/// Per-session cart persistence. Keys are `cart:{session_id}`, TTL-bounded;
/// the cart disappears on its own when a session goes quiet.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get(&self, session_id: &str) -> CartResult<Option<Cart>>;
    async fn put(&self, cart: &Cart) -> CartResult<()>;
    async fn delete(&self, session_id: &str) -> CartResult<()>;
}

// ---------------- Redis implementation ----------------

#[derive(Clone)]
pub struct RedisCartStore {
    conn: ConnectionManager,
    ttl: Duration,
}

fn cart_key(session_id: &str) -> String {
    format!("cart:{session_id}")
}

impl RedisCartStore {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }
}

#[async_trait]
impl CartStore for RedisCartStore {
    async fn get(&self, session_id: &str) -> CartResult<Option<Cart>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .get(cart_key(session_id))
            .await
            .map_err(|err| CartError::Store(err.to_string()))?;
        match payload {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|err| CartError::Store(err.to_string())),
            None => Ok(None),
        }
    }

    async fn put(&self, cart: &Cart) -> CartResult<()> {
        let mut conn = self.conn.clone();
        let payload =
            serde_json::to_string(cart).map_err(|err| CartError::Store(err.to_string()))?;
        let _: () = redis::cmd("SETEX")
            .arg(cart_key(&cart.session_id))
            .arg(self.ttl.as_secs())
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|err| CartError::Store(err.to_string()))?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> CartResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(cart_key(session_id))
            .await
            .map_err(|err| CartError::Store(err.to_string()))?;
        Ok(())
    }
}

// ---------------- In-memory implementation (tests, local dev) ----------------

#[derive(Clone, Default)]
pub struct InMemoryCartStore {
    inner: Arc<Mutex<HashMap<String, Cart>>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn get(&self, session_id: &str) -> CartResult<Option<Cart>> {
        Ok(self.inner.lock().await.get(session_id).cloned())
    }

    async fn put(&self, cart: &Cart) -> CartResult<()> {
        self.inner
            .lock()
            .await
            .insert(cart.session_id.clone(), cart.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> CartResult<()> {
        self.inner.lock().await.remove(session_id);
        Ok(())
    }
}
