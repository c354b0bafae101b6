use std::env;
use std::time::Duration;

use crate::provider::ModelTier;

const MAX_ACCOUNTS: u32 = 20;
const KEY_PLACEHOLDER: &str = "YOUR_API_KEY_HERE";

const DEFAULT_PRIMARY_RPM: u32 = 5_000;
const DEFAULT_PRIMARY_TPM: u64 = 450_000;
const DEFAULT_MINI_RPM: u32 = 5_000;
const DEFAULT_MINI_TPM: u64 = 2_000_000;
const DEFAULT_BUFFER_PERCENT: u8 = 80;

#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub number: u32,
    pub api_key: String,
    pub primary_rpm: u32,
    pub primary_tpm: u64,
    pub mini_rpm: u32,
    pub mini_tpm: u64,
    pub buffer_percent: u8,
}

impl AccountConfig {
    pub fn with_defaults(number: u32, api_key: String) -> Self {
        Self {
            number,
            api_key,
            primary_rpm: DEFAULT_PRIMARY_RPM,
            primary_tpm: DEFAULT_PRIMARY_TPM,
            mini_rpm: DEFAULT_MINI_RPM,
            mini_tpm: DEFAULT_MINI_TPM,
            buffer_percent: DEFAULT_BUFFER_PERCENT,
        }
    }

    /// Key as it may appear in logs: suffix only.
    pub fn masked_key(&self) -> String {
        if self.api_key.len() > 10 {
            format!("...{}", &self.api_key[self.api_key.len() - 6..])
        } else {
            "***".to_string()
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub accounts: Vec<AccountConfig>,
    pub fallback_api_key: Option<String>,
    pub cooldown: Duration,
    pub retry_timeout: Duration,
    pub poll_interval: Duration,
    pub api_base_url: String,
    pub primary_model: String,
    pub mini_model: String,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let mut accounts = Vec::new();
        for number in 1..=MAX_ACCOUNTS {
            let Some(api_key) = env::var(format!("ACCOUNT_{number}_API_KEY")).ok() else {
                continue;
            };
            if api_key.trim().is_empty() || api_key == KEY_PLACEHOLDER {
                continue;
            }

            let primary_rpm = parse_env(&format!("ACCOUNT_{number}_PRIMARY_RPM"), DEFAULT_PRIMARY_RPM);
            let primary_tpm = parse_env(&format!("ACCOUNT_{number}_PRIMARY_TPM"), DEFAULT_PRIMARY_TPM);
            let mini_rpm = parse_env(&format!("ACCOUNT_{number}_MINI_RPM"), DEFAULT_MINI_RPM);
            let mini_tpm = parse_env(&format!("ACCOUNT_{number}_MINI_TPM"), DEFAULT_MINI_TPM);
            let buffer_percent: u8 =
                parse_env(&format!("ACCOUNT_{number}_BUFFER_PERCENT"), DEFAULT_BUFFER_PERCENT);

            // Budgets must be positive and the buffer must leave headroom
            // below the hard limit.
            let buffer_percent = if (1..=99).contains(&buffer_percent) {
                buffer_percent
            } else {
                tracing::warn!(
                    account = number,
                    buffer_percent,
                    "buffer percent out of range, using default"
                );
                DEFAULT_BUFFER_PERCENT
            };
            if primary_rpm == 0 || primary_tpm == 0 || mini_rpm == 0 || mini_tpm == 0 {
                tracing::warn!(account = number, "zero rate limit configured, skipping account");
                continue;
            }

            accounts.push(AccountConfig {
                number,
                api_key,
                primary_rpm,
                primary_tpm,
                mini_rpm,
                mini_tpm,
                buffer_percent,
            });
        }

        Self {
            accounts,
            fallback_api_key: env::var("LLM_FALLBACK_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty() && key != KEY_PLACEHOLDER),
            cooldown: Duration::from_secs(parse_env("LLM_COOLDOWN_SECONDS", 60)),
            retry_timeout: Duration::from_secs(parse_env("LLM_RETRY_TIMEOUT_SECONDS", 30)),
            poll_interval: Duration::from_secs(parse_env("LLM_RETRY_POLL_SECONDS", 5)),
            api_base_url: env::var("LLM_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            primary_model: env::var("LLM_PRIMARY_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            mini_model: env::var("LLM_MINI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        }
    }

    pub fn model_name(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Primary => &self.primary_model,
            ModelTier::Mini => &self.mini_model,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_key_shows_suffix_only() {
        let config = AccountConfig::with_defaults(1, "sk-abcdefghijklmnop".into());
        assert_eq!(config.masked_key(), "...klmnop");
        let short = AccountConfig::with_defaults(2, "short".into());
        assert_eq!(short.masked_key(), "***");
    }
}
