use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};

/// Install the process-wide tracing subscriber. `RUST_LOG` overrides the
/// default `info` filter. Safe to call once per process.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[derive(Clone)]
pub struct SchedulerMetrics {
    pub registry: Registry,
    pub requests_total: IntCounterVec,
    pub cooldowns_total: IntCounterVec,
    pub capacity_exhausted_total: IntCounter,
    pub account_pool_size: IntGauge,
    pub find_account_seconds: Histogram,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let requests_total = IntCounterVec::new(
            prometheus::Opts::new(
                "llm_requests_total",
                "LLM dispatches recorded against account budgets",
            ),
            &["model_tier", "account"],
        )
        .unwrap();
        let cooldowns_total = IntCounterVec::new(
            prometheus::Opts::new(
                "llm_tracker_cooldowns_total",
                "Tracker transitions into the cooling state",
            ),
            &["model_tier", "account"],
        )
        .unwrap();
        let capacity_exhausted_total = IntCounter::new(
            "llm_capacity_exhausted_total",
            "Scheduling attempts that timed out with every account saturated",
        )
        .unwrap();
        let account_pool_size = IntGauge::new(
            "llm_account_pool_size",
            "Accounts that survived the startup credit probe",
        )
        .unwrap();
        let find_account_seconds = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "llm_find_account_seconds",
                "Time spent scanning for an account with spare budget",
            )
            .buckets(vec![0.001, 0.01, 0.1, 1.0, 5.0, 10.0, 30.0]),
        )
        .unwrap();
        let _ = registry.register(Box::new(requests_total.clone()));
        let _ = registry.register(Box::new(cooldowns_total.clone()));
        let _ = registry.register(Box::new(capacity_exhausted_total.clone()));
        let _ = registry.register(Box::new(account_pool_size.clone()));
        let _ = registry.register(Box::new(find_account_seconds.clone()));
        SchedulerMetrics {
            registry,
            requests_total,
            cooldowns_total,
            capacity_exhausted_total,
            account_pool_size,
            find_account_seconds,
        }
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct InventoryMetrics {
    pub registry: Registry,
    pub reservations_total: IntCounter,
    pub releases_total: IntCounter,
    pub confirms_total: IntCounter,
    pub oversell_rejected_total: IntCounter,
    pub reservation_drift_total: IntCounter,
}

impl InventoryMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let reservations_total = IntCounter::new(
            "inventory_reservations_total",
            "Successful reservation writes",
        )
        .unwrap();
        let releases_total = IntCounter::new(
            "inventory_releases_total",
            "Reservations returned to available stock",
        )
        .unwrap();
        let confirms_total = IntCounter::new(
            "inventory_confirms_total",
            "Reservations consumed by checkout",
        )
        .unwrap();
        let oversell_rejected_total = IntCounter::new(
            "inventory_oversell_rejected_total",
            "Reservation attempts rejected for insufficient stock",
        )
        .unwrap();
        let reservation_drift_total = IntCounter::new(
            "inventory_reservation_drift_total",
            "Bookkeeping mismatches between cart entries and reservations",
        )
        .unwrap();
        let _ = registry.register(Box::new(reservations_total.clone()));
        let _ = registry.register(Box::new(releases_total.clone()));
        let _ = registry.register(Box::new(confirms_total.clone()));
        let _ = registry.register(Box::new(oversell_rejected_total.clone()));
        let _ = registry.register(Box::new(reservation_drift_total.clone()));
        InventoryMetrics {
            registry,
            reservations_total,
            releases_total,
            confirms_total,
            oversell_rejected_total,
            reservation_drift_total,
        }
    }
}

impl Default for InventoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct SessionMetrics {
    pub registry: Registry,
    pub tokens_issued_total: IntCounter,
    pub tokens_renewed_total: IntCounter,
    pub tokens_revoked_total: IntCounter,
    pub carts_abandoned_total: IntCounter,
    pub carts_restored_total: IntCounter,
}

impl SessionMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let tokens_issued_total =
            IntCounter::new("session_tokens_issued_total", "Session JWTs issued").unwrap();
        let tokens_renewed_total = IntCounter::new(
            "session_tokens_renewed_total",
            "Session JWTs extended via sliding-window renewal",
        )
        .unwrap();
        let tokens_revoked_total =
            IntCounter::new("session_tokens_revoked_total", "Session JWTs revoked").unwrap();
        let carts_abandoned_total = IntCounter::new(
            "carts_abandoned_total",
            "Cart snapshots persisted at logout or expiry",
        )
        .unwrap();
        let carts_restored_total = IntCounter::new(
            "carts_restored_total",
            "Abandoned carts explicitly restored by a returning user",
        )
        .unwrap();
        let _ = registry.register(Box::new(tokens_issued_total.clone()));
        let _ = registry.register(Box::new(tokens_renewed_total.clone()));
        let _ = registry.register(Box::new(tokens_revoked_total.clone()));
        let _ = registry.register(Box::new(carts_abandoned_total.clone()));
        let _ = registry.register(Box::new(carts_restored_total.clone()));
        SessionMetrics {
            registry,
            tokens_issued_total,
            tokens_renewed_total,
            tokens_revoked_total,
            carts_abandoned_total,
            carts_restored_total,
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}
