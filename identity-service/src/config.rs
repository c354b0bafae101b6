use anyhow::{Context, Result};
use std::env;

use crate::tokens::TokenConfig;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub secret_key: String,
    pub token_ttl_days: i64,
    pub renewal_threshold_days: i64,
    pub abandoned_cart_window_hours: i64,
    pub abandoned_booking_window_days: i64,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self> {
        let secret_key = env::var("SECRET_KEY").context("SECRET_KEY must be set")?;
        Ok(Self {
            secret_key,
            token_ttl_days: parse_env("SESSION_TOKEN_TTL_DAYS", 30),
            renewal_threshold_days: parse_env("SESSION_RENEWAL_THRESHOLD_DAYS", 7),
            abandoned_cart_window_hours: parse_env("ABANDONED_CART_WINDOW_HOURS", 2),
            abandoned_booking_window_days: parse_env("ABANDONED_BOOKING_WINDOW_DAYS", 7),
        })
    }

    pub fn token_config(&self) -> TokenConfig {
        TokenConfig {
            ttl_days: self.token_ttl_days,
            renewal_threshold_days: self.renewal_threshold_days,
        }
    }
}

fn parse_env(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(default)
}
