use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common_observability::SchedulerMetrics;

use crate::account::{AccountProvider, AccountUsage};
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::pool::AccountPool;
use crate::provider::{ChatCompletionClient, ChatMessage, ChatResponse, ModelTier};
use crate::tracker::UsageStats;

const DEFAULT_TEMPERATURE: f32 = 0.3;
// Structured calls are charged a flat conservative estimate; the schema and
// tool scaffolding dominate the prompt size.
const STRUCTURED_TOKEN_ESTIMATE: u64 = 1_000;

/// Round-robin scheduler over the validated account pool. Reentrant: any
/// number of tasks may invoke concurrently. The cursor is a single shared
/// integer; two dispatches may read the same index in the same tick, which is
/// safe because admission is re-checked per dispatch and losers keep
/// scanning.
pub struct LlmScheduler {
    pool: AccountPool,
    client: Arc<dyn ChatCompletionClient>,
    cooldown: Duration,
    retry_timeout: Duration,
    poll_interval: Duration,
    primary_model: String,
    mini_model: String,
    cursor: AtomicUsize,
    metrics: Arc<SchedulerMetrics>,
}

impl LlmScheduler {
    pub fn new(
        pool: AccountPool,
        client: Arc<dyn ChatCompletionClient>,
        config: &LlmConfig,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        metrics.account_pool_size.set(pool.len() as i64);
        tracing::info!(
            accounts = pool.len(),
            cooldown_secs = config.cooldown.as_secs(),
            retry_timeout_secs = config.retry_timeout.as_secs(),
            poll_secs = config.poll_interval.as_secs(),
            "llm scheduler initialized"
        );
        Self {
            pool,
            client,
            cooldown: config.cooldown,
            retry_timeout: config.retry_timeout,
            poll_interval: config.poll_interval,
            primary_model: config.primary_model.clone(),
            mini_model: config.mini_model.clone(),
            cursor: AtomicUsize::new(0),
            metrics,
        }
    }

    fn model_name(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Primary => &self.primary_model,
            ModelTier::Mini => &self.mini_model,
        }
    }

    /// Rough pre-dispatch estimate: one token per four characters plus a 20%
    /// safety margin, never below 100. This estimate is also the authoritative
    /// charge recorded against the budget.
    pub fn estimate_tokens(messages: &[ChatMessage]) -> u64 {
        let total_chars: usize = messages.iter().map(|message| message.content.len()).sum();
        let estimated = (total_chars as f64 / 4.0 * 1.2).ceil() as u64;
        estimated.max(100)
    }

    /// Scan accounts round-robin from the shared cursor until one admits the
    /// request, sleeping `poll_interval` between full scans, up to the retry
    /// deadline.
    async fn find_account(
        &self,
        tier: ModelTier,
        estimated_tokens: u64,
    ) -> Result<Arc<AccountProvider>, LlmError> {
        let total = self.pool.len();
        if total == 0 {
            return Err(LlmError::NoValidAccounts);
        }

        let started = common_clock::now();
        let deadline = started + self.retry_timeout;

        loop {
            for offset in 0..total {
                let index = (self.cursor.load(Ordering::Relaxed) + offset) % total;
                let account = &self.pool.accounts()[index];
                let (admitted, stats) = account.can_handle(tier, estimated_tokens).await;
                if admitted {
                    self.cursor.store((index + 1) % total, Ordering::Relaxed);
                    self.metrics
                        .find_account_seconds
                        .observe(started.elapsed().as_secs_f64());
                    tracing::info!(
                        account = account.number(),
                        model_tier = tier.as_str(),
                        current_rpm = stats.current_rpm,
                        current_tpm = stats.current_tpm,
                        "account selected"
                    );
                    return Ok(Arc::clone(account));
                }
            }

            if common_clock::now() + self.poll_interval > deadline {
                break;
            }
            tracing::warn!(
                model_tier = tier.as_str(),
                accounts = total,
                retry_in_secs = self.poll_interval.as_secs(),
                "all accounts busy, retrying"
            );
            tokio::time::sleep(self.poll_interval).await;
        }

        let mut snapshot = Vec::with_capacity(total);
        for account in self.pool.accounts() {
            snapshot.push(account.usage_both().await);
        }
        self.metrics.capacity_exhausted_total.inc();
        self.metrics
            .find_account_seconds
            .observe(started.elapsed().as_secs_f64());
        tracing::error!(
            model_tier = tier.as_str(),
            accounts = total,
            timeout_secs = self.retry_timeout.as_secs(),
            "no account available before deadline"
        );
        Err(LlmError::CapacityExhausted {
            model_tier: tier,
            accounts: total,
            snapshot,
        })
    }

    /// Dispatch a chat completion through the first account with spare
    /// budget. The token estimate is charged exactly once on success;
    /// provider-side failures are surfaced without touching the budget; the
    /// tracker's job is to avoid limits, not to react to them.
    pub async fn invoke(
        &self,
        messages: &[ChatMessage],
        tier: ModelTier,
        temperature: Option<f32>,
    ) -> Result<ChatResponse, LlmError> {
        let estimated_tokens = Self::estimate_tokens(messages);
        let account = self.find_account(tier, estimated_tokens).await?;
        let model = self.model_name(tier);

        match self
            .client
            .complete(
                account.api_key(),
                model,
                messages,
                temperature.unwrap_or(DEFAULT_TEMPERATURE),
                None,
            )
            .await
        {
            Ok(response) => {
                let cooled = account
                    .record_request(tier, estimated_tokens, self.cooldown)
                    .await;
                self.note_dispatch(&account, tier, cooled);
                tracing::info!(
                    account = account.number(),
                    model_tier = tier.as_str(),
                    estimated_tokens,
                    "llm request succeeded"
                );
                Ok(response)
            }
            Err(err) => {
                tracing::error!(
                    account = account.number(),
                    model_tier = tier.as_str(),
                    error = %err,
                    "llm request failed"
                );
                Err(err.into())
            }
        }
    }

    /// Schema-constrained variant: the provider response is forced through a
    /// function call and deserialized into `T`. Deserialization failures are
    /// surfaced as `SchemaMismatch`; callers own the fallback.
    pub async fn invoke_structured<T: DeserializeOwned>(
        &self,
        messages: &[ChatMessage],
        schema_name: &str,
        schema: &Value,
        tier: ModelTier,
        temperature: Option<f32>,
    ) -> Result<T, LlmError> {
        let account = self.find_account(tier, STRUCTURED_TOKEN_ESTIMATE).await?;
        let model = self.model_name(tier);

        let value = match self
            .client
            .complete_structured(
                account.api_key(),
                model,
                messages,
                temperature.unwrap_or(DEFAULT_TEMPERATURE),
                schema_name,
                schema,
            )
            .await
        {
            Ok(value) => {
                let cooled = account
                    .record_request(tier, STRUCTURED_TOKEN_ESTIMATE, self.cooldown)
                    .await;
                self.note_dispatch(&account, tier, cooled);
                value
            }
            Err(err) => {
                tracing::error!(
                    account = account.number(),
                    model_tier = tier.as_str(),
                    error = %err,
                    "structured llm request failed"
                );
                return Err(err.into());
            }
        };

        serde_json::from_value(value).map_err(|err| LlmError::SchemaMismatch(err.to_string()))
    }

    fn note_dispatch(&self, account: &AccountProvider, tier: ModelTier, cooled: bool) {
        let account_label = account.number().to_string();
        self.metrics
            .requests_total
            .with_label_values(&[tier.as_str(), &account_label])
            .inc();
        if cooled {
            self.metrics
                .cooldowns_total
                .with_label_values(&[tier.as_str(), &account_label])
                .inc();
        }
    }

    /// Round-robin key handout for components that cannot route through the
    /// scheduler. No admission check; the budget is charged when the caller's
    /// request eventually lands.
    pub fn next_api_key(&self) -> Result<String, LlmError> {
        let total = self.pool.len();
        if total == 0 {
            return Err(LlmError::NoValidAccounts);
        }
        let index = self.cursor.load(Ordering::Relaxed) % total;
        self.cursor.store((index + 1) % total, Ordering::Relaxed);
        Ok(self.pool.accounts()[index].api_key().to_string())
    }

    pub fn account_count(&self) -> usize {
        self.pool.len()
    }

    pub async fn usage_stats(&self) -> Vec<AccountUsage> {
        let mut stats = Vec::with_capacity(self.pool.len());
        for account in self.pool.accounts() {
            stats.push(account.usage_both().await);
        }
        stats
    }

    pub async fn usage_stats_for(&self, tier: ModelTier) -> Vec<UsageStats> {
        let mut stats = Vec::with_capacity(self.pool.len());
        for account in self.pool.accounts() {
            stats.push(account.usage(tier).await);
        }
        stats
    }
}
