use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use identity_service::IdentityConfig;
use llm_service::LlmConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub redis_url: String,
    pub database_url: String,
    pub llm: LlmConfig,
    pub identity: IdentityConfig,
    pub cart_ttl: Duration,
    pub menu_refresh_every: Duration,
    pub inventory_cache_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let redis_url = env::var("REDIS_URL").context("REDIS_URL must be set")?;
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let cart_ttl_seconds = env::var("CART_TTL_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(3600);
        let menu_refresh_seconds = env::var("MENU_REFRESH_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(300);
        let inventory_cache_enabled = env::var("INVENTORY_CACHE_ENABLED")
            .map(|value| {
                matches!(
                    value.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
            .unwrap_or(true);

        Ok(Self {
            redis_url,
            database_url,
            llm: LlmConfig::from_env(),
            identity: IdentityConfig::from_env()?,
            cart_ttl: Duration::from_secs(cart_ttl_seconds.max(1)),
            menu_refresh_every: Duration::from_secs(menu_refresh_seconds.max(30)),
            inventory_cache_enabled,
        })
    }
}
