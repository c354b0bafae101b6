//! Composition root. Every service is constructed exactly once per process
//! here and injected downward; external surfaces (HTTP, WebSocket, delivery
//! adapters) depend on this crate and provide the ports it asks for.

pub mod config;

pub use config::AppConfig;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

use cart_service::{CartService, CartStore, RedisCartStore};
use common_observability::{InventoryMetrics, SchedulerMetrics, SessionMetrics};
use identity_service::{
    IdentityService, IdentityStore, PgIdentityStore, SessionTokenCodec, UserDataManager,
};
use inventory_service::{
    InMemoryInventoryStore, InventoryStore, RedisInventoryStore, StockLevel,
};
use llm_service::{AccountPool, ChatCompletionClient, LlmScheduler, OpenAiClient};
use menu_service::{MenuCache, MenuSource, SimilarityIndex};
use ordering_service::SubIntentClassifier;

/// Ports the core consumes but does not implement: the provider client, the
/// canonical menu source, the optional vector index, and the seed stock
/// loaded by the relational glue.
pub struct AppPorts {
    pub chat_client: Arc<dyn ChatCompletionClient>,
    pub menu_source: Arc<dyn MenuSource>,
    pub similarity: Option<Arc<dyn SimilarityIndex>>,
    pub initial_stock: Vec<StockLevel>,
}

impl AppPorts {
    /// Ports for a standard deployment: OpenAI-compatible provider, caller's
    /// menu source, no vector index.
    pub fn standard(config: &AppConfig, menu_source: Arc<dyn MenuSource>) -> Self {
        Self {
            chat_client: Arc::new(OpenAiClient::new(config.llm.api_base_url.clone())),
            menu_source,
            similarity: None,
            initial_stock: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct AppMetrics {
    pub scheduler: Arc<SchedulerMetrics>,
    pub inventory: Arc<InventoryMetrics>,
    pub session: Arc<SessionMetrics>,
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self {
            scheduler: Arc::new(SchedulerMetrics::new()),
            inventory: Arc::new(InventoryMetrics::new()),
            session: Arc::new(SessionMetrics::new()),
        }
    }
}

pub struct AppServices {
    pub scheduler: Arc<LlmScheduler>,
    pub classifier: Arc<SubIntentClassifier>,
    pub inventory: Arc<dyn InventoryStore>,
    pub menu: Arc<MenuCache>,
    pub carts: Arc<CartService>,
    pub identity: Arc<IdentityService>,
    pub user_data: Arc<UserDataManager>,
    pub metrics: AppMetrics,
    menu_refresh: Option<tokio::task::JoinHandle<()>>,
}

impl AppServices {
    /// Full startup sequence: validate the account pool, connect the shared
    /// stores, load the menu exhaustively, seed inventory, and wire every
    /// service. Aborts when no provider account survives the credit probe.
    pub async fn initialize(config: &AppConfig, ports: AppPorts) -> Result<Self> {
        let metrics = AppMetrics::default();

        let pool = AccountPool::build(&config.llm, ports.chat_client.as_ref())
            .await
            .context("provider account validation failed")?;
        let scheduler = Arc::new(LlmScheduler::new(
            pool,
            ports.chat_client.clone(),
            &config.llm,
            metrics.scheduler.clone(),
        ));
        let classifier = Arc::new(SubIntentClassifier::new(scheduler.clone()));

        let redis_client =
            redis::Client::open(config.redis_url.as_str()).context("invalid REDIS_URL")?;
        let redis_conn = ConnectionManager::new(redis_client)
            .await
            .context("failed to connect to redis")?;
        let pg_pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("failed to connect to postgres")?;

        let inventory: Arc<dyn InventoryStore> = if config.inventory_cache_enabled {
            Arc::new(RedisInventoryStore::new(
                redis_conn.clone(),
                metrics.inventory.clone(),
            ))
        } else {
            tracing::warn!("inventory cache disabled, using in-process store");
            Arc::new(InMemoryInventoryStore::with_metrics(
                metrics.inventory.clone(),
            ))
        };
        inventory
            .sync_from_canonical(&ports.initial_stock)
            .await
            .context("failed to seed inventory")?;

        let menu = MenuCache::load(
            ports.menu_source,
            ports.similarity,
            Some(redis_conn.clone()),
        )
        .await
        .context("initial menu load failed")?;
        let menu_refresh = menu.spawn_refresh_task(config.menu_refresh_every);

        let cart_store: Arc<dyn CartStore> =
            Arc::new(RedisCartStore::new(redis_conn, config.cart_ttl));
        let carts = Arc::new(CartService::new(
            cart_store.clone(),
            inventory.clone(),
            menu.clone(),
            metrics.inventory.clone(),
        ));

        let identity_store: Arc<dyn IdentityStore> = Arc::new(PgIdentityStore::new(pg_pool));
        let identity = Arc::new(IdentityService::new(
            identity_store.clone(),
            SessionTokenCodec::new(&config.identity.secret_key, config.identity.token_config()),
            metrics.session.clone(),
        ));
        let user_data = Arc::new(UserDataManager::new(
            identity_store,
            inventory.clone(),
            cart_store,
            metrics.session.clone(),
            config.identity.abandoned_cart_window_hours,
            config.identity.abandoned_booking_window_days,
        ));

        tracing::info!(
            accounts = scheduler.account_count(),
            menu_items = menu.stats().await.items,
            "platform core initialized"
        );

        Ok(Self {
            scheduler,
            classifier,
            inventory,
            menu,
            carts,
            identity,
            user_data,
            metrics,
            menu_refresh: Some(menu_refresh),
        })
    }

    /// Assemble from pre-built parts, skipping all network setup. Backs the
    /// in-process test harness and local development.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        scheduler: Arc<LlmScheduler>,
        inventory: Arc<dyn InventoryStore>,
        menu: Arc<MenuCache>,
        cart_store: Arc<dyn CartStore>,
        identity_store: Arc<dyn IdentityStore>,
        codec: SessionTokenCodec,
        metrics: AppMetrics,
        cart_window_hours: i64,
        booking_window_days: i64,
    ) -> Self {
        let classifier = Arc::new(SubIntentClassifier::new(scheduler.clone()));
        let carts = Arc::new(CartService::new(
            cart_store.clone(),
            inventory.clone(),
            menu.clone(),
            metrics.inventory.clone(),
        ));
        let identity = Arc::new(IdentityService::new(
            identity_store.clone(),
            codec,
            metrics.session.clone(),
        ));
        let user_data = Arc::new(UserDataManager::new(
            identity_store,
            inventory.clone(),
            cart_store,
            metrics.session.clone(),
            cart_window_hours,
            booking_window_days,
        ));
        Self {
            scheduler,
            classifier,
            inventory,
            menu,
            carts,
            identity,
            user_data,
            metrics,
            menu_refresh: None,
        }
    }

    /// Stop background work. Stores close with their connections.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.menu_refresh.take() {
            task.abort();
        }
        tracing::info!("platform core shut down");
    }
}
