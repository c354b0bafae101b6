use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::AccountConfig;
use crate::provider::ModelTier;
use crate::tracker::{ModelUsageTracker, UsageStats};

/// One provider account with an independent budget tracker per model tier.
/// The account exclusively owns its trackers; callers go through the
/// async accessors, which serialise per-tier mutations.
#[derive(Debug)]
pub struct AccountProvider {
    number: u32,
    api_key: String,
    primary: Mutex<ModelUsageTracker>,
    mini: Mutex<ModelUsageTracker>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountUsage {
    pub account_number: u32,
    pub primary: UsageStats,
    pub mini: UsageStats,
}

impl AccountProvider {
    pub fn new(config: &AccountConfig) -> Self {
        let primary = ModelUsageTracker::new(
            format!("account_{}_primary", config.number),
            ModelTier::Primary,
            config.primary_rpm,
            config.primary_tpm,
            config.buffer_percent,
        );
        let mini = ModelUsageTracker::new(
            format!("account_{}_mini", config.number),
            ModelTier::Mini,
            config.mini_rpm,
            config.mini_tpm,
            config.buffer_percent,
        );
        tracing::info!(
            account = config.number,
            api_key = %config.masked_key(),
            primary_limits = %format!("{}RPM/{}TPM", config.primary_rpm, config.primary_tpm),
            mini_limits = %format!("{}RPM/{}TPM", config.mini_rpm, config.mini_tpm),
            buffer_percent = config.buffer_percent,
            "account provider initialized"
        );
        Self {
            number: config.number,
            api_key: config.api_key.clone(),
            primary: Mutex::new(primary),
            mini: Mutex::new(mini),
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn tracker_for(&self, tier: ModelTier) -> &Mutex<ModelUsageTracker> {
        match tier {
            ModelTier::Primary => &self.primary,
            ModelTier::Mini => &self.mini,
        }
    }

    pub async fn can_handle(&self, tier: ModelTier, estimated_tokens: u64) -> (bool, UsageStats) {
        self.tracker_for(tier).lock().await.can_handle(estimated_tokens)
    }

    /// Returns true when the recorded request tripped the tier into cooldown.
    pub async fn record_request(&self, tier: ModelTier, tokens: u64, cooldown: Duration) -> bool {
        self.tracker_for(tier)
            .lock()
            .await
            .record_request(tokens, cooldown)
    }

    pub async fn usage(&self, tier: ModelTier) -> UsageStats {
        self.tracker_for(tier).lock().await.usage()
    }

    pub async fn usage_both(&self) -> AccountUsage {
        AccountUsage {
            account_number: self.number,
            primary: self.primary.lock().await.usage(),
            mini: self.mini.lock().await.usage(),
        }
    }
}
