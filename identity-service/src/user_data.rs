use chrono::{Duration, Utc};
use common_observability::SessionMetrics;
use serde_json::Value;
use std::sync::Arc;

use cart_service::{Cart, CartItem, CartStore, SessionRef};
use inventory_service::InventoryStore;

use crate::error::{IdentityError, IdentityResult};
use crate::store::{
    AbandonedBookingRecord, AbandonedCartRecord, IdentityStore, UserProfile,
};

/// A snapshot line with the live availability attached at login time.
#[derive(Debug, Clone)]
pub struct RestorableItem {
    pub item: CartItem,
    pub available: u32,
}

#[derive(Debug, Clone)]
pub struct CartRestoration {
    pub all_available: bool,
    pub available: Vec<RestorableItem>,
    pub unavailable: Vec<RestorableItem>,
    pub summaries: Vec<String>,
    pub snapshot: Cart,
}

#[derive(Debug, Clone)]
pub struct BookingRestoration {
    pub details: Value,
    pub last_step_completed: Option<String>,
}

/// Hydrated session payload handed to the conversation layer on login.
#[derive(Debug, Clone, Default)]
pub struct LoginPayload {
    pub profile: Option<UserProfile>,
    pub cart_restoration: Option<CartRestoration>,
    pub booking_restoration: Option<BookingRestoration>,
}

/// Partial booking carried in conversation state at logout time.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub details: Value,
    pub last_step_completed: Option<String>,
}

/// Login/logout orchestration and abandoned cart/booking restoration.
///
/// Restoration is explicit: login only reports what is salvageable; a later
/// user action re-reserves and restores.
pub struct UserDataManager {
    store: Arc<dyn IdentityStore>,
    inventory: Arc<dyn InventoryStore>,
    carts: Arc<dyn CartStore>,
    metrics: Arc<SessionMetrics>,
    cart_window: Duration,
    booking_window: Duration,
}

impl UserDataManager {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        inventory: Arc<dyn InventoryStore>,
        carts: Arc<dyn CartStore>,
        metrics: Arc<SessionMetrics>,
        cart_window_hours: i64,
        booking_window_days: i64,
    ) -> Self {
        Self {
            store,
            inventory,
            carts,
            metrics,
            cart_window: Duration::hours(cart_window_hours),
            booking_window: Duration::days(booking_window_days),
        }
    }

    /// Hydrate a freshly authenticated session: profile and dietary data,
    /// abandoned-cart availability partitioning, abandoned-booking metadata.
    /// Anonymous holdings from before authentication migrate to the user id.
    pub async fn on_login(
        &self,
        user_id: &str,
        session: &SessionRef,
    ) -> IdentityResult<LoginPayload> {
        let profile = self.store.get_user(user_id).await?;
        if profile.is_none() {
            tracing::warn!(user_id, "login for unknown user profile");
        }

        // Cross-tier transition: anything reserved under the anonymous
        // session id now belongs to the user id.
        if session.session_id != session.holder {
            if let Some(cart) = self
                .carts
                .get(&session.session_id)
                .await
                .map_err(IdentityError::store)?
            {
                for entry in &cart.items {
                    if let Err(err) = self
                        .inventory
                        .migrate_holder(&entry.item_id, &session.session_id, &session.holder)
                        .await
                    {
                        tracing::error!(
                            user_id,
                            item_id = %entry.item_id,
                            error = %err,
                            "failed to migrate reservation on login"
                        );
                    }
                }
            }
        }

        let now = Utc::now();
        let cart_restoration = match self.store.latest_abandoned_cart(user_id, now).await? {
            Some(record) => Some(self.partition_snapshot(record).await?),
            None => None,
        };
        let booking_restoration = self
            .store
            .latest_abandoned_booking(user_id, now)
            .await?
            .map(|record| BookingRestoration {
                details: record.details,
                last_step_completed: record.last_step_completed,
            });

        tracing::info!(
            user_id,
            has_abandoned_cart = cart_restoration.is_some(),
            has_abandoned_booking = booking_restoration.is_some(),
            "user logged in"
        );

        Ok(LoginPayload {
            profile,
            cart_restoration,
            booking_restoration,
        })
    }

    /// Split a snapshot into still-available and unavailable lines, with
    /// counts and plain-language summaries the agent can relay verbatim.
    async fn partition_snapshot(
        &self,
        record: AbandonedCartRecord,
    ) -> IdentityResult<CartRestoration> {
        let mut available = Vec::new();
        let mut unavailable = Vec::new();

        for item in &record.snapshot.items {
            let (in_stock, count) = self
                .inventory
                .check(&item.item_id, item.quantity)
                .await
                .map_err(IdentityError::store)?;
            let line = RestorableItem {
                item: item.clone(),
                available: count,
            };
            if in_stock {
                available.push(line);
            } else {
                unavailable.push(line);
            }
        }

        let mut summaries = Vec::new();
        if !available.is_empty() {
            let names: Vec<&str> = available
                .iter()
                .map(|line| line.item.name.as_str())
                .collect();
            let verb = if names.len() == 1 { "is" } else { "are" };
            summaries.push(format!("Good news! {} {verb} still available.", names.join(", ")));
        }
        if !unavailable.is_empty() {
            let details: Vec<String> = unavailable
                .iter()
                .map(|line| {
                    if line.available == 0 {
                        format!("{} (out of stock)", line.item.name)
                    } else {
                        format!(
                            "{} (only {} left, you wanted {})",
                            line.item.name, line.available, line.item.quantity
                        )
                    }
                })
                .collect();
            summaries.push(format!("Unfortunately, {}.", details.join(", ")));
        }

        Ok(CartRestoration {
            all_available: unavailable.is_empty(),
            available,
            unavailable,
            summaries,
            snapshot: record.snapshot,
        })
    }

    /// Tear a session down: release every reservation (best-effort), persist
    /// the cart and any partial booking for later restoration, then destroy
    /// the session cache. Partial failures are logged, never fatal; the
    /// abandonment window reconciles stragglers.
    pub async fn on_logout(
        &self,
        user_id: &str,
        session: &SessionRef,
        pending_booking: Option<BookingDraft>,
    ) -> IdentityResult<()> {
        let cart = self
            .carts
            .get(&session.session_id)
            .await
            .map_err(IdentityError::store)?;

        if let Some(cart) = &cart {
            for entry in &cart.items {
                if let Err(err) = self.inventory.release(&entry.item_id, &session.holder).await {
                    tracing::error!(
                        user_id,
                        item_id = %entry.item_id,
                        error = %err,
                        "failed to release reservation on logout"
                    );
                }
            }

            if !cart.items.is_empty() {
                let now = Utc::now();
                self.store
                    .upsert_abandoned_cart(&AbandonedCartRecord {
                        user_id: user_id.to_string(),
                        snapshot: cart.clone(),
                        created_at: now,
                        expires_at: now + self.cart_window,
                        restored: false,
                    })
                    .await?;
                self.metrics.carts_abandoned_total.inc();
            }
        }

        if let Some(draft) = pending_booking {
            let now = Utc::now();
            self.store
                .upsert_abandoned_booking(&AbandonedBookingRecord {
                    user_id: user_id.to_string(),
                    details: draft.details,
                    last_step_completed: draft.last_step_completed,
                    created_at: now,
                    expires_at: now + self.booking_window,
                    restored: false,
                })
                .await?;
        }

        self.carts
            .delete(&session.session_id)
            .await
            .map_err(IdentityError::store)?;

        tracing::info!(
            user_id,
            cart_saved = cart.as_ref().map(|c| !c.items.is_empty()).unwrap_or(false),
            "user logged out"
        );
        Ok(())
    }

    /// Explicit restoration of the abandoned cart: re-reserve every line,
    /// silently dropping the ones that no longer fit (login already told the
    /// user which), write the cart back, and burn the record.
    pub async fn restore_cart(
        &self,
        user_id: &str,
        session: &SessionRef,
    ) -> IdentityResult<Cart> {
        let record = self
            .store
            .latest_abandoned_cart(user_id, Utc::now())
            .await?
            .ok_or(IdentityError::NothingToRestore)?;

        let mut restored = Cart::empty(&session.session_id);
        for entry in record.snapshot.items {
            match self
                .inventory
                .reserve(&entry.item_id, entry.quantity, &session.holder)
                .await
            {
                Ok(()) => restored.items.push(entry),
                Err(err) => {
                    tracing::warn!(
                        user_id,
                        item_id = %entry.item_id,
                        error = %err,
                        "dropping unrestorable cart line"
                    );
                }
            }
        }

        restored.order_type = record.snapshot.order_type;
        restored.updated_at = Utc::now();
        self.carts
            .put(&restored)
            .await
            .map_err(IdentityError::store)?;
        self.store.mark_cart_restored(user_id).await?;
        self.metrics.carts_restored_total.inc();

        tracing::info!(
            user_id,
            restored_items = restored.items.len(),
            "abandoned cart restored"
        );
        Ok(restored)
    }

    /// Activity ping: rewriting the cart refreshes its TTL.
    pub async fn on_activity(&self, session: &SessionRef) -> IdentityResult<()> {
        if let Some(cart) = self
            .carts
            .get(&session.session_id)
            .await
            .map_err(IdentityError::store)?
        {
            self.carts.put(&cart).await.map_err(IdentityError::store)?;
        }
        Ok(())
    }
}
