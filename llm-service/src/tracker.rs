use common_clock::SlidingWindow;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::provider::ModelTier;

pub const WINDOW_SPAN: Duration = Duration::from_secs(60);
const COOLDOWN_EXTENSION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownState {
    Available,
    Cooling,
}

/// Point-in-time budget snapshot, attached to `CapacityExhausted` errors and
/// exposed through the scheduler's stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub provider: String,
    pub model_tier: ModelTier,
    pub current_rpm: usize,
    pub rpm_limit: u32,
    pub rpm_utilization: f64,
    pub current_tpm: u64,
    pub tpm_limit: u64,
    pub tpm_utilization: f64,
    pub cooldown_state: CooldownState,
}

/// Per-(account, model-tier) budget over a shared 60-second sliding window.
///
/// Two budgets ride the same window: requests per minute (entry count) and
/// tokens per minute (entry weight). Crossing `buffer_percent` of either on a
/// recorded request flips the tracker into `Cooling`; the cooldown settles
/// back to `Available` on the next query once `cooldown_until` has passed and
/// both utilisations are below the buffer again, or extends by 30 seconds if
/// the window is still saturated.
#[derive(Debug)]
pub struct ModelUsageTracker {
    provider: String,
    model_tier: ModelTier,
    rpm_limit: u32,
    tpm_limit: u64,
    buffer_percent: u8,
    window: SlidingWindow,
    state: CooldownState,
    cooldown_until: Option<Instant>,
}

impl ModelUsageTracker {
    pub fn new(
        provider: String,
        model_tier: ModelTier,
        rpm_limit: u32,
        tpm_limit: u64,
        buffer_percent: u8,
    ) -> Self {
        Self {
            provider,
            model_tier,
            rpm_limit,
            tpm_limit,
            buffer_percent,
            window: SlidingWindow::new(WINDOW_SPAN),
            state: CooldownState::Available,
            cooldown_until: None,
        }
    }

    fn utilizations(&mut self) -> (usize, u64, f64, f64) {
        let current_rpm = self.window.count_within();
        let current_tpm = self.window.sum_within();
        let rpm_utilization = current_rpm as f64 / self.rpm_limit as f64 * 100.0;
        let tpm_utilization = current_tpm as f64 / self.tpm_limit as f64 * 100.0;
        (current_rpm, current_tpm, rpm_utilization, tpm_utilization)
    }

    /// Settle the cooldown state machine: past `cooldown_until`, release if
    /// both utilisations dropped below the buffer, otherwise extend by 30s.
    fn settle_cooldown(&mut self) {
        let Some(until) = self.cooldown_until else {
            return;
        };
        if self.state != CooldownState::Cooling || common_clock::now() < until {
            return;
        }
        let (_, _, rpm_utilization, tpm_utilization) = self.utilizations();
        let buffer = f64::from(self.buffer_percent);
        if rpm_utilization < buffer && tpm_utilization < buffer {
            self.state = CooldownState::Available;
            self.cooldown_until = None;
            tracing::info!(
                provider = %self.provider,
                rpm_utilization,
                tpm_utilization,
                "cooldown expired, tracker available"
            );
        } else {
            self.cooldown_until = Some(common_clock::now() + COOLDOWN_EXTENSION);
            tracing::warn!(
                provider = %self.provider,
                rpm_utilization,
                tpm_utilization,
                "window still saturated at cooldown expiry, extending"
            );
        }
    }

    /// Advisory admission check. Never consumes budget.
    pub fn can_handle(&mut self, estimated_tokens: u64) -> (bool, UsageStats) {
        self.settle_cooldown();
        if self.state == CooldownState::Cooling {
            return (false, self.stats());
        }

        let (current_rpm, current_tpm, _, _) = self.utilizations();
        let rpm_threshold = f64::from(self.rpm_limit) * f64::from(self.buffer_percent) / 100.0;
        let tpm_threshold = self.tpm_limit as f64 * f64::from(self.buffer_percent) / 100.0;

        let would_exceed_rpm = (current_rpm + 1) as f64 > rpm_threshold;
        let would_exceed_tpm = (current_tpm + estimated_tokens) as f64 > tpm_threshold;

        (!(would_exceed_rpm || would_exceed_tpm), self.stats())
    }

    /// Charge one request against the window. Must be called exactly once per
    /// successful dispatch, never for provider-side failures.
    ///
    /// Returns true when this record tripped the tracker into cooldown.
    pub fn record_request(&mut self, tokens: u64, cooldown: Duration) -> bool {
        self.window.add(tokens);
        let (_, _, rpm_utilization, tpm_utilization) = self.utilizations();
        let buffer = f64::from(self.buffer_percent);

        if rpm_utilization >= buffer || tpm_utilization >= buffer {
            self.state = CooldownState::Cooling;
            self.cooldown_until = Some(common_clock::now() + cooldown);
            tracing::warn!(
                provider = %self.provider,
                rpm_utilization,
                tpm_utilization,
                cooldown_secs = cooldown.as_secs(),
                "buffer reached, tracker cooling down"
            );
            true
        } else {
            tracing::debug!(
                provider = %self.provider,
                tokens,
                rpm_utilization,
                tpm_utilization,
                "request recorded"
            );
            false
        }
    }

    /// Current usage, settling the cooldown state machine first.
    pub fn usage(&mut self) -> UsageStats {
        self.settle_cooldown();
        self.stats()
    }

    fn stats(&mut self) -> UsageStats {
        let (current_rpm, current_tpm, rpm_utilization, tpm_utilization) = self.utilizations();
        UsageStats {
            provider: self.provider.clone(),
            model_tier: self.model_tier,
            current_rpm,
            rpm_limit: self.rpm_limit,
            rpm_utilization,
            current_tpm,
            tpm_limit: self.tpm_limit,
            tpm_utilization,
            cooldown_state: self.state,
        }
    }
}
