//! Per-session cart service. Every mutation reserves inventory before the
//! cart is written, so a cart entry always has a matching reservation; the
//! only deliberate exception is the release path, where inventory
//! bookkeeping errors are logged rather than failing the cart operation.

pub mod error;
pub mod store;

pub use error::{CartError, CartResult};
pub use store::{Cart, CartItem, CartStore, InMemoryCartStore, OrderType, RedisCartStore};

use chrono::Utc;
use common_money::Money;
use common_observability::InventoryMetrics;
use inventory_service::{InventoryError, InventoryStore};
use menu_service::{MenuCache, MenuItem};
use std::sync::Arc;

const MAX_LINE_QUANTITY: u32 = 50;
const MAX_ALTERNATIVES: usize = 2;

/// How a session addresses its cart and its inventory holdings. The cart
/// blob is always keyed by session id; the reservation holder is the session
/// id for anonymous and device-recognised tiers and the user id once the
/// session is authenticated (holdings migrate on the tier transition).
#[derive(Debug, Clone)]
pub struct SessionRef {
    pub session_id: String,
    pub holder: String,
}

impl SessionRef {
    pub fn anonymous(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self {
            holder: session_id.clone(),
            session_id,
        }
    }

    pub fn authenticated(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            holder: user_id.into(),
        }
    }
}

/// Outcome payload for a cart mutation; response composition happens in the
/// conversational layer, outside this crate.
#[derive(Debug, Clone)]
pub struct CartOperation {
    pub action: CartAction,
    pub item_name: String,
    pub quantity: u32,
    pub item_price: Money,
    pub line_total: Money,
    pub cart_subtotal: Money,
    pub cart_item_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartAction {
    Added,
    Updated,
    Removed,
}

#[derive(Debug, Clone)]
pub struct ExistingCart {
    pub cart: Cart,
    pub age_minutes: i64,
}

pub struct CartService {
    store: Arc<dyn CartStore>,
    inventory: Arc<dyn InventoryStore>,
    menu: Arc<MenuCache>,
    metrics: Arc<InventoryMetrics>,
}

impl CartService {
    pub fn new(
        store: Arc<dyn CartStore>,
        inventory: Arc<dyn InventoryStore>,
        menu: Arc<MenuCache>,
        metrics: Arc<InventoryMetrics>,
    ) -> Self {
        Self {
            store,
            inventory,
            menu,
            metrics,
        }
    }

    /// Resolve a cart key: menu item id first, then case-insensitive exact
    /// name.
    async fn resolve_item(&self, item_key: &str) -> CartResult<Arc<MenuItem>> {
        if let Some(item) = self.menu.get_item(item_key).await {
            return Ok(item);
        }
        self.menu
            .find_by_exact_name(item_key)
            .await
            .ok_or_else(|| CartError::NotFound(item_key.to_string()))
    }

    /// Add `qty` of an item on top of whatever the cart already holds. The
    /// inventory reservation covers the combined quantity and happens before
    /// the cart is written; an out-of-stock answer leaves the cart untouched
    /// and carries up to two alternatives.
    pub async fn add(
        &self,
        session: &SessionRef,
        item_key: &str,
        qty: u32,
    ) -> CartResult<CartOperation> {
        self.write_quantity(session, item_key, qty, QuantityMode::Increment)
            .await
    }

    /// Set an absolute quantity for a line. The reservation engine is
    /// net-aware, so shrinking a line returns stock.
    pub async fn update_quantity(
        &self,
        session: &SessionRef,
        item_key: &str,
        new_qty: u32,
    ) -> CartResult<CartOperation> {
        self.write_quantity(session, item_key, new_qty, QuantityMode::Absolute)
            .await
    }

    async fn write_quantity(
        &self,
        session: &SessionRef,
        item_key: &str,
        qty: u32,
        mode: QuantityMode,
    ) -> CartResult<CartOperation> {
        if qty == 0 || qty > MAX_LINE_QUANTITY {
            return Err(CartError::InvalidQuantity);
        }

        let item = self.resolve_item(item_key).await?;
        if !item.is_available {
            return Err(CartError::Unavailable {
                name: item.name.clone(),
            });
        }

        let mut cart = self
            .store
            .get(&session.session_id)
            .await?
            .unwrap_or_else(|| Cart::empty(&session.session_id));
        let existing_qty = cart.quantity_of(&item.id);
        let final_qty = match mode {
            QuantityMode::Increment => existing_qty.saturating_add(qty).min(MAX_LINE_QUANTITY),
            QuantityMode::Absolute => qty,
        };

        // Reserve before the cart is written; failure must not mutate state.
        if let Err(err) = self
            .inventory
            .reserve(&item.id, final_qty, &session.holder)
            .await
        {
            return Err(self.enrich_out_of_stock(err, &item).await);
        }

        let action = if existing_qty > 0 {
            if let Some(entry) = cart.items.iter_mut().find(|entry| entry.item_id == item.id) {
                entry.quantity = final_qty;
            }
            CartAction::Updated
        } else {
            cart.items.push(CartItem {
                item_id: item.id.clone(),
                name: item.name.clone(),
                price: item.price,
                quantity: final_qty,
                category: item.category_id.clone(),
            });
            CartAction::Added
        };
        cart.updated_at = Utc::now();
        self.store.put(&cart).await?;

        tracing::info!(
            session_id = %session.session_id,
            item = %item.name,
            quantity = final_qty,
            subtotal_paise = cart.subtotal().paise(),
            "cart updated"
        );

        Ok(CartOperation {
            action,
            item_name: item.name.clone(),
            quantity: final_qty,
            item_price: item.price,
            line_total: item.price.line_total(final_qty),
            cart_subtotal: cart.subtotal(),
            cart_item_count: cart.items.len(),
        })
    }

    async fn enrich_out_of_stock(&self, err: InventoryError, item: &MenuItem) -> CartError {
        match err {
            InventoryError::OutOfStock { available, .. } => {
                let alternatives = self
                    .menu
                    .similar_items(&item.name, &item.id, MAX_ALTERNATIVES)
                    .await
                    .into_iter()
                    .map(|alternative| alternative.name.clone())
                    .collect();
                CartError::OutOfStock {
                    name: item.name.clone(),
                    available,
                    alternatives,
                }
            }
            other => CartError::from_inventory(other, &item.name),
        }
    }

    /// Remove an item entirely. The reservation release is best-effort: the
    /// cart operation must not fail because inventory bookkeeping drifted.
    pub async fn remove(&self, session: &SessionRef, item_key: &str) -> CartResult<CartOperation> {
        let mut cart = self
            .store
            .get(&session.session_id)
            .await?
            .ok_or(CartError::EmptyCart)?;
        if cart.items.is_empty() {
            return Err(CartError::EmptyCart);
        }

        let wanted = item_key.trim().to_lowercase();
        let position = cart
            .items
            .iter()
            .position(|entry| entry.item_id == item_key || entry.name.to_lowercase() == wanted)
            .ok_or_else(|| CartError::NotFound(item_key.to_string()))?;
        let removed = cart.items.remove(position);

        match self
            .inventory
            .release(&removed.item_id, &session.holder)
            .await
        {
            Ok(0) => {
                // Cart held an entry with no backing reservation.
                self.metrics.reservation_drift_total.inc();
                tracing::warn!(
                    session_id = %session.session_id,
                    item_id = %removed.item_id,
                    "no reservation found while removing cart entry"
                );
            }
            Ok(released) => {
                tracing::info!(
                    session_id = %session.session_id,
                    item_id = %removed.item_id,
                    released,
                    "reservation released for removed cart entry"
                );
            }
            Err(err) => {
                tracing::error!(
                    session_id = %session.session_id,
                    item_id = %removed.item_id,
                    error = %err,
                    "failed to release reservation, continuing cart removal"
                );
            }
        }

        cart.updated_at = Utc::now();
        self.store.put(&cart).await?;

        Ok(CartOperation {
            action: CartAction::Removed,
            item_name: removed.name.clone(),
            quantity: removed.quantity,
            item_price: removed.price,
            line_total: removed.price.line_total(removed.quantity),
            cart_subtotal: cart.subtotal(),
            cart_item_count: cart.items.len(),
        })
    }

    /// Release every reservation held by the session, then drop the cart.
    pub async fn clear(&self, session: &SessionRef) -> CartResult<()> {
        if let Some(cart) = self.store.get(&session.session_id).await? {
            for entry in &cart.items {
                if let Err(err) = self.inventory.release(&entry.item_id, &session.holder).await {
                    tracing::error!(
                        session_id = %session.session_id,
                        item_id = %entry.item_id,
                        error = %err,
                        "failed to release reservation while clearing cart"
                    );
                }
            }
        }
        self.store.delete(&session.session_id).await?;
        tracing::info!(session_id = %session.session_id, "cart cleared");
        Ok(())
    }

    /// Current cart contents; an absent cart reads as empty.
    pub async fn view(&self, session: &SessionRef) -> CartResult<Cart> {
        Ok(self
            .store
            .get(&session.session_id)
            .await?
            .unwrap_or_else(|| Cart::empty(&session.session_id)))
    }

    /// Cart plus its age in minutes. Never mutates.
    pub async fn check_existing(&self, session: &SessionRef) -> CartResult<Option<ExistingCart>> {
        let Some(cart) = self.store.get(&session.session_id).await? else {
            return Ok(None);
        };
        let age_minutes = (Utc::now() - cart.updated_at).num_minutes();
        Ok(Some(ExistingCart { cart, age_minutes }))
    }

    pub async fn set_order_type(
        &self,
        session: &SessionRef,
        order_type: OrderType,
    ) -> CartResult<Cart> {
        let mut cart = self
            .store
            .get(&session.session_id)
            .await?
            .ok_or(CartError::EmptyCart)?;
        cart.order_type = Some(order_type);
        cart.updated_at = Utc::now();
        self.store.put(&cart).await?;
        Ok(cart)
    }

    /// Confirm every reservation (stock is consumed for good) and drop the
    /// cart key. Returns the final snapshot for order creation downstream.
    pub async fn checkout(&self, session: &SessionRef) -> CartResult<Cart> {
        let cart = self
            .store
            .get(&session.session_id)
            .await?
            .ok_or(CartError::EmptyCart)?;
        if cart.items.is_empty() {
            return Err(CartError::EmptyCart);
        }

        for entry in &cart.items {
            self.inventory
                .confirm(&entry.item_id, &session.holder)
                .await
                .map_err(|err| CartError::Store(err.to_string()))?;
        }
        self.store.delete(&session.session_id).await?;
        tracing::info!(
            session_id = %session.session_id,
            items = cart.items.len(),
            subtotal_paise = cart.subtotal().paise(),
            "checkout confirmed"
        );
        Ok(cart)
    }
}

#[derive(Clone, Copy)]
enum QuantityMode {
    Increment,
    Absolute,
}
