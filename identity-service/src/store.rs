use async_trait::async_trait;
use cart_service::Cart;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{IdentityError, IdentityResult};

/// Revocation-ledger row for one issued session token.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub jti: String,
    pub user_id: String,
    pub device_id: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub usage_count: i64,
    pub revoked: bool,
}

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub device_id: String,
    pub user_id: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub user_id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub preferences: Value,
    pub dietary_restrictions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AbandonedCartRecord {
    pub user_id: String,
    pub snapshot: Cart,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub restored: bool,
}

#[derive(Debug, Clone)]
pub struct AbandonedBookingRecord {
    pub user_id: String,
    pub details: Value,
    pub last_step_completed: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub restored: bool,
}

/// Relational-store port for identity state: token ledger, device registry,
/// user profiles, and abandoned cart/booking snapshots.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn insert_token(&self, record: &TokenRecord) -> IdentityResult<()>;
    async fn get_token(&self, jti: &str) -> IdentityResult<Option<TokenRecord>>;
    /// Bump usage bookkeeping; `new_expiry` extends the ledger row on
    /// sliding-window renewal.
    async fn touch_token(
        &self,
        jti: &str,
        used_at: DateTime<Utc>,
        new_expiry: Option<DateTime<Utc>>,
    ) -> IdentityResult<()>;
    async fn revoke_token(&self, jti: &str, reason: &str) -> IdentityResult<bool>;
    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> IdentityResult<u64>;

    async fn get_device(&self, device_id: &str) -> IdentityResult<Option<DeviceRecord>>;
    async fn upsert_device(
        &self,
        device_id: &str,
        user_id: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> IdentityResult<DeviceRecord>;

    async fn get_user(&self, user_id: &str) -> IdentityResult<Option<UserProfile>>;

    /// Latest unrestored, unexpired abandoned cart.
    async fn latest_abandoned_cart(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> IdentityResult<Option<AbandonedCartRecord>>;
    async fn upsert_abandoned_cart(&self, record: &AbandonedCartRecord) -> IdentityResult<()>;
    async fn mark_cart_restored(&self, user_id: &str) -> IdentityResult<()>;

    async fn latest_abandoned_booking(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> IdentityResult<Option<AbandonedBookingRecord>>;
    async fn upsert_abandoned_booking(
        &self,
        record: &AbandonedBookingRecord,
    ) -> IdentityResult<()>;
}

// ---------------- Postgres implementation ----------------

pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn insert_token(&self, record: &TokenRecord) -> IdentityResult<()> {
        sqlx::query(
            "INSERT INTO session_tokens (jti, user_id, device_id, issued_at, expires_at, last_used_at, usage_count, revoked)
             VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE)",
        )
        .bind(&record.jti)
        .bind(&record.user_id)
        .bind(&record.device_id)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.last_used_at)
        .bind(record.usage_count)
        .execute(&self.pool)
        .await
        .map_err(IdentityError::store)?;
        Ok(())
    }

    async fn get_token(&self, jti: &str) -> IdentityResult<Option<TokenRecord>> {
        let row = sqlx::query(
            "SELECT jti, user_id, device_id, issued_at, expires_at, last_used_at, usage_count, revoked
             FROM session_tokens WHERE jti = $1",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await
        .map_err(IdentityError::store)?;

        row.map(|row| -> IdentityResult<TokenRecord> {
            Ok(TokenRecord {
                jti: row.try_get("jti").map_err(IdentityError::store)?,
                user_id: row.try_get("user_id").map_err(IdentityError::store)?,
                device_id: row.try_get("device_id").map_err(IdentityError::store)?,
                issued_at: row.try_get("issued_at").map_err(IdentityError::store)?,
                expires_at: row.try_get("expires_at").map_err(IdentityError::store)?,
                last_used_at: row.try_get("last_used_at").map_err(IdentityError::store)?,
                usage_count: row.try_get("usage_count").map_err(IdentityError::store)?,
                revoked: row.try_get("revoked").map_err(IdentityError::store)?,
            })
        })
        .transpose()
    }

    async fn touch_token(
        &self,
        jti: &str,
        used_at: DateTime<Utc>,
        new_expiry: Option<DateTime<Utc>>,
    ) -> IdentityResult<()> {
        match new_expiry {
            Some(expiry) => sqlx::query(
                "UPDATE session_tokens
                 SET last_used_at = $2, usage_count = usage_count + 1, expires_at = $3
                 WHERE jti = $1",
            )
            .bind(jti)
            .bind(used_at)
            .bind(expiry)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(IdentityError::store),
            None => sqlx::query(
                "UPDATE session_tokens
                 SET last_used_at = $2, usage_count = usage_count + 1
                 WHERE jti = $1",
            )
            .bind(jti)
            .bind(used_at)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(IdentityError::store),
        }
    }

    async fn revoke_token(&self, jti: &str, reason: &str) -> IdentityResult<bool> {
        let result = sqlx::query(
            "UPDATE session_tokens SET revoked = TRUE, revoked_at = NOW(), revoked_reason = $2
             WHERE jti = $1 AND revoked = FALSE",
        )
        .bind(jti)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(IdentityError::store)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> IdentityResult<u64> {
        let result = sqlx::query(
            "DELETE FROM session_tokens WHERE expires_at < $1 AND revoked = FALSE",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(IdentityError::store)?;
        Ok(result.rows_affected())
    }

    async fn get_device(&self, device_id: &str) -> IdentityResult<Option<DeviceRecord>> {
        let row = sqlx::query(
            "SELECT device_id, user_id, first_seen_at, last_seen_at
             FROM user_devices WHERE device_id = $1 AND is_active = TRUE",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(IdentityError::store)?;

        row.map(|row| -> IdentityResult<DeviceRecord> {
            Ok(DeviceRecord {
                device_id: row.try_get("device_id").map_err(IdentityError::store)?,
                user_id: row.try_get("user_id").map_err(IdentityError::store)?,
                first_seen_at: row.try_get("first_seen_at").map_err(IdentityError::store)?,
                last_seen_at: row.try_get("last_seen_at").map_err(IdentityError::store)?,
            })
        })
        .transpose()
    }

    async fn upsert_device(
        &self,
        device_id: &str,
        user_id: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> IdentityResult<DeviceRecord> {
        let row = sqlx::query(
            "INSERT INTO user_devices (device_id, user_id, first_seen_at, last_seen_at, is_active)
             VALUES ($1, $2, $3, $3, TRUE)
             ON CONFLICT (device_id)
             DO UPDATE SET user_id = COALESCE(EXCLUDED.user_id, user_devices.user_id),
                           last_seen_at = EXCLUDED.last_seen_at
             RETURNING device_id, user_id, first_seen_at, last_seen_at",
        )
        .bind(device_id)
        .bind(user_id)
        .bind(seen_at)
        .fetch_one(&self.pool)
        .await
        .map_err(IdentityError::store)?;

        Ok(DeviceRecord {
            device_id: row.try_get("device_id").map_err(IdentityError::store)?,
            user_id: row.try_get("user_id").map_err(IdentityError::store)?,
            first_seen_at: row.try_get("first_seen_at").map_err(IdentityError::store)?,
            last_seen_at: row.try_get("last_seen_at").map_err(IdentityError::store)?,
        })
    }

    async fn get_user(&self, user_id: &str) -> IdentityResult<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT id, name, phone, email, preferences, dietary_restrictions
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(IdentityError::store)?;

        row.map(|row| -> IdentityResult<UserProfile> {
            let preferences: Option<Value> =
                row.try_get("preferences").map_err(IdentityError::store)?;
            let dietary: Option<Vec<String>> = row
                .try_get("dietary_restrictions")
                .map_err(IdentityError::store)?;
            Ok(UserProfile {
                user_id: row.try_get("id").map_err(IdentityError::store)?,
                name: row.try_get("name").map_err(IdentityError::store)?,
                phone: row.try_get("phone").map_err(IdentityError::store)?,
                email: row.try_get("email").map_err(IdentityError::store)?,
                preferences: preferences.unwrap_or(Value::Null),
                dietary_restrictions: dietary.unwrap_or_default(),
            })
        })
        .transpose()
    }

    async fn latest_abandoned_cart(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> IdentityResult<Option<AbandonedCartRecord>> {
        let row = sqlx::query(
            "SELECT user_id, cart_snapshot, created_at, expires_at, restored
             FROM abandoned_carts
             WHERE user_id = $1 AND restored = FALSE AND expires_at > $2
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(IdentityError::store)?;

        row.map(|row| -> IdentityResult<AbandonedCartRecord> {
            let snapshot: Value = row.try_get("cart_snapshot").map_err(IdentityError::store)?;
            Ok(AbandonedCartRecord {
                user_id: row.try_get("user_id").map_err(IdentityError::store)?,
                snapshot: serde_json::from_value(snapshot).map_err(IdentityError::store)?,
                created_at: row.try_get("created_at").map_err(IdentityError::store)?,
                expires_at: row.try_get("expires_at").map_err(IdentityError::store)?,
                restored: row.try_get("restored").map_err(IdentityError::store)?,
            })
        })
        .transpose()
    }

    async fn upsert_abandoned_cart(&self, record: &AbandonedCartRecord) -> IdentityResult<()> {
        let snapshot = serde_json::to_value(&record.snapshot).map_err(IdentityError::store)?;
        sqlx::query(
            "INSERT INTO abandoned_carts (user_id, cart_snapshot, created_at, expires_at, restored)
             VALUES ($1, $2, $3, $4, FALSE)
             ON CONFLICT (user_id)
             DO UPDATE SET cart_snapshot = EXCLUDED.cart_snapshot,
                           created_at = EXCLUDED.created_at,
                           expires_at = EXCLUDED.expires_at,
                           restored = FALSE",
        )
        .bind(&record.user_id)
        .bind(snapshot)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(IdentityError::store)
    }

    async fn mark_cart_restored(&self, user_id: &str) -> IdentityResult<()> {
        sqlx::query("UPDATE abandoned_carts SET restored = TRUE WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(IdentityError::store)
    }

    async fn latest_abandoned_booking(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> IdentityResult<Option<AbandonedBookingRecord>> {
        let row = sqlx::query(
            "SELECT user_id, booking_details, last_step_completed, created_at, expires_at, restored
             FROM abandoned_bookings
             WHERE user_id = $1 AND restored = FALSE AND expires_at > $2
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(IdentityError::store)?;

        row.map(|row| -> IdentityResult<AbandonedBookingRecord> {
            Ok(AbandonedBookingRecord {
                user_id: row.try_get("user_id").map_err(IdentityError::store)?,
                details: row.try_get("booking_details").map_err(IdentityError::store)?,
                last_step_completed: row
                    .try_get("last_step_completed")
                    .map_err(IdentityError::store)?,
                created_at: row.try_get("created_at").map_err(IdentityError::store)?,
                expires_at: row.try_get("expires_at").map_err(IdentityError::store)?,
                restored: row.try_get("restored").map_err(IdentityError::store)?,
            })
        })
        .transpose()
    }

    async fn upsert_abandoned_booking(
        &self,
        record: &AbandonedBookingRecord,
    ) -> IdentityResult<()> {
        sqlx::query(
            "INSERT INTO abandoned_bookings (user_id, booking_details, last_step_completed, created_at, expires_at, restored)
             VALUES ($1, $2, $3, $4, $5, FALSE)
             ON CONFLICT (user_id)
             DO UPDATE SET booking_details = EXCLUDED.booking_details,
                           last_step_completed = EXCLUDED.last_step_completed,
                           created_at = EXCLUDED.created_at,
                           expires_at = EXCLUDED.expires_at,
                           restored = FALSE",
        )
        .bind(&record.user_id)
        .bind(&record.details)
        .bind(&record.last_step_completed)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(IdentityError::store)
    }
}

// ---------------- In-memory implementation (tests, local dev) ----------------

#[derive(Default)]
struct MemoryState {
    tokens: HashMap<String, TokenRecord>,
    devices: HashMap<String, DeviceRecord>,
    users: HashMap<String, UserProfile>,
    abandoned_carts: HashMap<String, AbandonedCartRecord>,
    abandoned_bookings: HashMap<String, AbandonedBookingRecord>,
}

#[derive(Clone, Default)]
pub struct InMemoryIdentityStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, profile: UserProfile) {
        self.inner
            .lock()
            .await
            .users
            .insert(profile.user_id.clone(), profile);
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn insert_token(&self, record: &TokenRecord) -> IdentityResult<()> {
        self.inner
            .lock()
            .await
            .tokens
            .insert(record.jti.clone(), record.clone());
        Ok(())
    }

    async fn get_token(&self, jti: &str) -> IdentityResult<Option<TokenRecord>> {
        Ok(self.inner.lock().await.tokens.get(jti).cloned())
    }

    async fn touch_token(
        &self,
        jti: &str,
        used_at: DateTime<Utc>,
        new_expiry: Option<DateTime<Utc>>,
    ) -> IdentityResult<()> {
        if let Some(record) = self.inner.lock().await.tokens.get_mut(jti) {
            record.last_used_at = used_at;
            record.usage_count += 1;
            if let Some(expiry) = new_expiry {
                record.expires_at = expiry;
            }
        }
        Ok(())
    }

    async fn revoke_token(&self, jti: &str, _reason: &str) -> IdentityResult<bool> {
        if let Some(record) = self.inner.lock().await.tokens.get_mut(jti) {
            if !record.revoked {
                record.revoked = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> IdentityResult<u64> {
        let mut state = self.inner.lock().await;
        let before = state.tokens.len();
        state
            .tokens
            .retain(|_, record| record.revoked || record.expires_at >= now);
        Ok((before - state.tokens.len()) as u64)
    }

    async fn get_device(&self, device_id: &str) -> IdentityResult<Option<DeviceRecord>> {
        Ok(self.inner.lock().await.devices.get(device_id).cloned())
    }

    async fn upsert_device(
        &self,
        device_id: &str,
        user_id: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> IdentityResult<DeviceRecord> {
        let mut state = self.inner.lock().await;
        let record = state
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceRecord {
                device_id: device_id.to_string(),
                user_id: None,
                first_seen_at: seen_at,
                last_seen_at: seen_at,
            });
        if let Some(user_id) = user_id {
            record.user_id = Some(user_id.to_string());
        }
        record.last_seen_at = seen_at;
        Ok(record.clone())
    }

    async fn get_user(&self, user_id: &str) -> IdentityResult<Option<UserProfile>> {
        Ok(self.inner.lock().await.users.get(user_id).cloned())
    }

    async fn latest_abandoned_cart(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> IdentityResult<Option<AbandonedCartRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .abandoned_carts
            .get(user_id)
            .filter(|record| !record.restored && record.expires_at > now)
            .cloned())
    }

    async fn upsert_abandoned_cart(&self, record: &AbandonedCartRecord) -> IdentityResult<()> {
        self.inner
            .lock()
            .await
            .abandoned_carts
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    async fn mark_cart_restored(&self, user_id: &str) -> IdentityResult<()> {
        if let Some(record) = self.inner.lock().await.abandoned_carts.get_mut(user_id) {
            record.restored = true;
        }
        Ok(())
    }

    async fn latest_abandoned_booking(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> IdentityResult<Option<AbandonedBookingRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .abandoned_bookings
            .get(user_id)
            .filter(|record| !record.restored && record.expires_at > now)
            .cloned())
    }

    async fn upsert_abandoned_booking(
        &self,
        record: &AbandonedBookingRecord,
    ) -> IdentityResult<()> {
        self.inner
            .lock()
            .await
            .abandoned_bookings
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }
}
