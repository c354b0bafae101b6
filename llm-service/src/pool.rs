use std::sync::Arc;

use crate::account::AccountProvider;
use crate::config::{AccountConfig, LlmConfig};
use crate::error::LlmError;
use crate::provider::{ChatCompletionClient, ChatMessage, ProviderError};

/// Result of the startup credit-validation probe for a single key.
#[derive(Debug)]
pub enum ProbeOutcome {
    Included,
    IncludedWithWarning(String),
    InvalidKey(String),
    NoCredits(String),
}

/// Probe a key with a minimal one-token completion against the cheapest
/// model. A successful call proves the account has credits, not merely a
/// well-formed key.
pub async fn probe_key(
    client: &dyn ChatCompletionClient,
    mini_model: &str,
    api_key: &str,
) -> ProbeOutcome {
    let messages = [ChatMessage::user("hi")];
    match client
        .complete(api_key, mini_model, &messages, 0.0, Some(1))
        .await
    {
        Ok(_) => ProbeOutcome::Included,
        Err(err @ ProviderError::Unauthorized(_)) => ProbeOutcome::InvalidKey(err.to_string()),
        Err(err @ ProviderError::RateLimited(_)) => {
            if err.looks_like_no_credits() {
                ProbeOutcome::NoCredits(err.to_string())
            } else {
                // Rate limited but the key is live; transient.
                ProbeOutcome::Included
            }
        }
        Err(err @ ProviderError::Api { .. }) => {
            if err.looks_like_no_credits() {
                ProbeOutcome::NoCredits(err.to_string())
            } else {
                ProbeOutcome::IncludedWithWarning(err.to_string())
            }
        }
        Err(err) => ProbeOutcome::IncludedWithWarning(err.to_string()),
    }
}

/// Validated set of provider accounts. Built once at startup; immutable
/// afterwards.
#[derive(Debug)]
pub struct AccountPool {
    accounts: Vec<Arc<AccountProvider>>,
}

impl AccountPool {
    /// Probe every configured account and keep the ones that pass. An empty
    /// result falls back to the single `LLM_FALLBACK_API_KEY`; if that fails
    /// too, startup aborts with `NoValidAccounts`.
    pub async fn build(
        config: &LlmConfig,
        client: &dyn ChatCompletionClient,
    ) -> Result<Self, LlmError> {
        let mut accounts = Vec::new();
        let mut invalid = 0usize;

        tracing::info!(
            configured = config.accounts.len(),
            "validating provider accounts"
        );

        for account_config in &config.accounts {
            match probe_key(client, &config.mini_model, &account_config.api_key).await {
                ProbeOutcome::Included => {
                    accounts.push(Arc::new(AccountProvider::new(account_config)));
                }
                ProbeOutcome::IncludedWithWarning(reason) => {
                    tracing::warn!(
                        account = account_config.number,
                        reason = %reason,
                        "account probe uncertain, including conservatively"
                    );
                    accounts.push(Arc::new(AccountProvider::new(account_config)));
                }
                ProbeOutcome::InvalidKey(reason) => {
                    invalid += 1;
                    tracing::warn!(
                        account = account_config.number,
                        reason = %reason,
                        "account excluded: invalid_key"
                    );
                }
                ProbeOutcome::NoCredits(reason) => {
                    invalid += 1;
                    tracing::warn!(
                        account = account_config.number,
                        reason = %reason,
                        "account excluded: no_credits"
                    );
                }
            }
        }

        if accounts.is_empty() {
            if let Some(fallback_key) = &config.fallback_api_key {
                match probe_key(client, &config.mini_model, fallback_key).await {
                    ProbeOutcome::Included | ProbeOutcome::IncludedWithWarning(_) => {
                        tracing::warn!(
                            "no configured account passed validation, using fallback key"
                        );
                        let fallback = AccountConfig::with_defaults(1, fallback_key.clone());
                        accounts.push(Arc::new(AccountProvider::new(&fallback)));
                    }
                    ProbeOutcome::InvalidKey(reason) | ProbeOutcome::NoCredits(reason) => {
                        tracing::error!(reason = %reason, "fallback key failed validation");
                        return Err(LlmError::NoValidAccounts);
                    }
                }
            } else {
                return Err(LlmError::NoValidAccounts);
            }
        }

        tracing::info!(
            validated = accounts.len(),
            excluded = invalid,
            "account validation complete"
        );

        Ok(Self { accounts })
    }

    /// Pool over pre-validated accounts; used by tests and tools that manage
    /// their own probing.
    pub fn from_accounts(accounts: Vec<Arc<AccountProvider>>) -> Self {
        Self { accounts }
    }

    pub fn accounts(&self) -> &[Arc<AccountProvider>] {
        &self.accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
