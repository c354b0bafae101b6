use crate::account::AccountUsage;
use crate::provider::{ModelTier, ProviderError};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Every account stayed saturated or cooling until the scheduling
    /// deadline. Carries a per-account utilisation snapshot for diagnostics;
    /// callers surface a "try again shortly" message.
    #[error("all {accounts} accounts at capacity or cooling down for {model_tier:?}")]
    CapacityExhausted {
        model_tier: ModelTier,
        accounts: usize,
        snapshot: Vec<AccountUsage>,
    },

    /// The startup probe left the pool empty and the fallback key failed too.
    #[error("no provider accounts with valid credentials and credits")]
    NoValidAccounts,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The provider produced a structured response that does not deserialize
    /// into the caller's schema. Callers supply a deterministic fallback.
    #[error("structured response did not match the expected schema: {0}")]
    SchemaMismatch(String),
}
