pub type IdentityResult<T> = Result<T, IdentityError>;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("session token invalid: {0}")]
    InvalidToken(String),

    #[error("session token revoked")]
    TokenRevoked,

    #[error("session token expired")]
    TokenExpired,

    #[error("no restorable snapshot for this user")]
    NothingToRestore,

    #[error("identity store error: {0}")]
    Store(String),
}

impl IdentityError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        IdentityError::Store(err.to_string())
    }
}
