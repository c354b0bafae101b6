use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::claims::{SessionClaims, TOKEN_TYPE_SESSION};
use crate::error::{IdentityError, IdentityResult};
use crate::store::TokenRecord;

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub ttl_days: i64,
    pub renewal_threshold_days: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            renewal_threshold_days: 7,
        }
    }
}

/// Issues and verifies HS256 session JWTs signed with the server secret.
pub struct SessionTokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    config: TokenConfig,
}

impl SessionTokenCodec {
    pub fn new(secret: &str, config: TokenConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            config,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::days(self.config.ttl_days)
    }

    pub fn renewal_threshold(&self) -> Duration {
        Duration::days(self.config.renewal_threshold_days)
    }

    /// Issue a fresh session token plus its ledger record.
    pub fn issue(
        &self,
        user_id: &str,
        device_id: Option<&str>,
    ) -> IdentityResult<(String, TokenRecord)> {
        let now = Utc::now();
        let expires_at = now + self.ttl();
        let jti = Uuid::new_v4().to_string();
        let claims = SessionClaims {
            jti: jti.clone(),
            user_id: user_id.to_string(),
            device_id: device_id.map(str::to_string),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            token_type: TOKEN_TYPE_SESSION.to_string(),
        };

        let token = encode(&Header::new(JWT_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|err| IdentityError::store(format!("failed to sign session token: {err}")))?;

        Ok((
            token,
            TokenRecord {
                jti,
                user_id: user_id.to_string(),
                device_id: device_id.map(str::to_string),
                issued_at: now,
                expires_at,
                last_used_at: now,
                usage_count: 0,
                revoked: false,
            },
        ))
    }

    /// Re-sign the same session (same jti) with a fresh expiry, for the
    /// sliding-window renewal. The previous JWT stays valid until its own
    /// `exp`; revocation is tracked per jti, not per encoding.
    pub fn reissue(
        &self,
        claims: &SessionClaims,
        new_expiry: DateTime<Utc>,
    ) -> IdentityResult<String> {
        let renewed = SessionClaims {
            exp: new_expiry.timestamp(),
            iat: Utc::now().timestamp(),
            ..claims.clone()
        };
        encode(&Header::new(JWT_ALGORITHM), &renewed, &self.encoding_key)
            .map_err(|err| IdentityError::store(format!("failed to re-sign session token: {err}")))
    }

    /// Verify signature and expiry of a presented JWT. Revocation is the
    /// ledger's concern and checked by the caller.
    pub fn decode(&self, token: &str) -> IdentityResult<SessionClaims> {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.validate_exp = true;
        // Expiry is exact: a token one second past `exp` is rejected.
        validation.leeway = 0;
        validation.required_spec_claims.clear();

        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation).map_err(
            |err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => IdentityError::TokenExpired,
                _ => IdentityError::InvalidToken(err.to_string()),
            },
        )?;

        if !data.claims.is_session_token() {
            return Err(IdentityError::InvalidToken(format!(
                "unexpected token type '{}'",
                data.claims.token_type
            )));
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> SessionTokenCodec {
        SessionTokenCodec::new("test-secret", TokenConfig::default())
    }

    #[test]
    fn issue_and_decode_round_trip() {
        let codec = codec();
        let (token, record) = codec.issue("usr-1", Some("dev-1")).unwrap();
        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.jti, record.jti);
        assert_eq!(claims.user_id, "usr-1");
        assert_eq!(claims.device_id.as_deref(), Some("dev-1"));
        assert_eq!(claims.token_type, "session");
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let codec = codec();
        let (token, _) = codec.issue("usr-1", None).unwrap();
        let other = SessionTokenCodec::new("other-secret", TokenConfig::default());
        assert!(matches!(
            other.decode(&token),
            Err(IdentityError::InvalidToken(_))
        ));
    }

    #[test]
    fn expired_tokens_are_a_distinct_error() {
        let codec = codec();
        let (_, record) = codec.issue("usr-1", None).unwrap();
        let claims = SessionClaims {
            jti: record.jti,
            user_id: record.user_id,
            device_id: None,
            iat: (Utc::now() - Duration::days(40)).timestamp(),
            exp: (Utc::now() - Duration::seconds(1)).timestamp(),
            token_type: TOKEN_TYPE_SESSION.to_string(),
        };
        let stale = codec.reissue(&claims, Utc::now() - Duration::seconds(1)).unwrap();
        assert!(matches!(codec.decode(&stale), Err(IdentityError::TokenExpired)));
    }
}
