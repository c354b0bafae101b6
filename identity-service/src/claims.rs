use serde::{Deserialize, Serialize};

pub const TOKEN_TYPE_SESSION: &str = "session";

/// Claims carried by a session JWT. The relational record keyed by `jti` is
/// the revocation ledger and always wins over the signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub jti: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

impl SessionClaims {
    pub fn is_session_token(&self) -> bool {
        self.token_type == TOKEN_TYPE_SESSION
    }
}
