use chrono::Utc;
use common_observability::SessionMetrics;
use std::sync::Arc;

use crate::claims::SessionClaims;
use crate::error::{IdentityError, IdentityResult};
use crate::store::{IdentityStore, TokenRecord};
use crate::tokens::SessionTokenCodec;

/// User recognition levels: anonymous, device-recognised, authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Anonymous = 1,
    Recognized = 2,
    Authenticated = 3,
}

#[derive(Debug, Clone)]
pub struct Recognition {
    pub tier: Tier,
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    /// Token to hand back to the client: the renewed JWT when a sliding
    /// renewal fired, otherwise the presented one.
    pub session_token: Option<String>,
    pub renewed: bool,
}

#[derive(Debug)]
pub struct ValidatedSession {
    pub claims: SessionClaims,
    pub record: TokenRecord,
    pub refreshed_token: Option<String>,
}

pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    codec: SessionTokenCodec,
    metrics: Arc<SessionMetrics>,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        codec: SessionTokenCodec,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            store,
            codec,
            metrics,
        }
    }

    /// Full validation of a presented session JWT: signature and expiry
    /// first, then the ledger: a revoked jti is rejected no matter how valid
    /// the signature is. Every successful validation bumps usage and applies
    /// the sliding-window renewal.
    pub async fn validate_token(&self, token: &str) -> IdentityResult<ValidatedSession> {
        let claims = self.codec.decode(token)?;
        let record = self
            .store
            .get_token(&claims.jti)
            .await?
            .ok_or_else(|| IdentityError::InvalidToken("unknown session".into()))?;

        if record.revoked {
            return Err(IdentityError::TokenRevoked);
        }
        let now = Utc::now();
        if record.expires_at <= now {
            return Err(IdentityError::TokenExpired);
        }

        // Sliding-window renewal: close to expiry, extend the ledger and
        // re-sign. The presented JWT stays valid until its own exp.
        let refreshed_token = if record.expires_at - now < self.codec.renewal_threshold() {
            let new_expiry = now + self.codec.ttl();
            self.store
                .touch_token(&claims.jti, now, Some(new_expiry))
                .await?;
            let renewed = self.codec.reissue(&claims, new_expiry)?;
            self.metrics.tokens_renewed_total.inc();
            tracing::info!(
                user_id = %claims.user_id,
                jti = %claims.jti,
                new_expiry = %new_expiry,
                "session token auto-renewed"
            );
            Some(renewed)
        } else {
            self.store.touch_token(&claims.jti, now, None).await?;
            None
        };

        Ok(ValidatedSession {
            claims,
            record,
            refreshed_token,
        })
    }

    /// Resolve the recognition tier. Priority order: valid session token,
    /// then a user-bound device, then a registered-but-unbound device, then
    /// fully anonymous. Token failures degrade to the device path; callers
    /// that need the precise failure use `validate_token`.
    pub async fn recognize(
        &self,
        device_id: Option<&str>,
        session_token: Option<&str>,
    ) -> IdentityResult<Recognition> {
        if let Some(token) = session_token {
            match self.validate_token(token).await {
                Ok(validated) => {
                    let renewed = validated.refreshed_token.is_some();
                    tracing::info!(
                        user_id = %validated.claims.user_id,
                        renewed,
                        "user recognized by session token"
                    );
                    return Ok(Recognition {
                        tier: Tier::Authenticated,
                        user_id: Some(validated.claims.user_id.clone()),
                        device_id: validated.claims.device_id.clone(),
                        session_token: Some(
                            validated
                                .refreshed_token
                                .unwrap_or_else(|| token.to_string()),
                        ),
                        renewed,
                    });
                }
                Err(err) => {
                    tracing::debug!(error = %err, "session token rejected, trying device");
                }
            }
        }

        if let Some(device_id) = device_id {
            let now = Utc::now();
            let device = self.store.upsert_device(device_id, None, now).await?;
            if let Some(user_id) = device.user_id {
                tracing::info!(device_id, user_id = %user_id, "user recognized by device");
                return Ok(Recognition {
                    tier: Tier::Recognized,
                    user_id: Some(user_id),
                    device_id: Some(device_id.to_string()),
                    session_token: None,
                    renewed: false,
                });
            }
            return Ok(Recognition {
                tier: Tier::Anonymous,
                user_id: None,
                device_id: Some(device_id.to_string()),
                session_token: None,
                renewed: false,
            });
        }

        Ok(Recognition {
            tier: Tier::Anonymous,
            user_id: None,
            device_id: None,
            session_token: None,
            renewed: false,
        })
    }

    /// Bind a device to an authenticated user and issue a fresh session
    /// token. Called after OTP or password authentication succeeds.
    pub async fn authenticate(
        &self,
        user_id: &str,
        device_id: Option<&str>,
    ) -> IdentityResult<String> {
        if let Some(device_id) = device_id {
            self.store
                .upsert_device(device_id, Some(user_id), Utc::now())
                .await?;
        }
        let (token, record) = self.codec.issue(user_id, device_id)?;
        self.store.insert_token(&record).await?;
        self.metrics.tokens_issued_total.inc();
        tracing::info!(
            user_id,
            device_id = device_id.unwrap_or("-"),
            jti = %record.jti,
            expires_at = %record.expires_at,
            "session token issued"
        );
        Ok(token)
    }

    /// Revoke the session behind a presented token. Returns false when the
    /// token cannot be decoded or is already revoked.
    pub async fn revoke(&self, token: &str, reason: &str) -> IdentityResult<bool> {
        let claims = match self.codec.decode(token) {
            Ok(claims) => claims,
            Err(_) => return Ok(false),
        };
        let revoked = self.store.revoke_token(&claims.jti, reason).await?;
        if revoked {
            self.metrics.tokens_revoked_total.inc();
            tracing::info!(user_id = %claims.user_id, reason, "session token revoked");
        }
        Ok(revoked)
    }

    /// Drop expired, unrevoked ledger rows. Run from a periodic sweep.
    pub async fn cleanup_expired_tokens(&self) -> IdentityResult<u64> {
        let removed = self.store.delete_expired_tokens(Utc::now()).await?;
        if removed > 0 {
            tracing::info!(removed, "expired session tokens cleaned up");
        }
        Ok(removed)
    }
}
