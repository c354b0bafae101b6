use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{MenuCategory, MenuItem};

pub type MenuResult<T> = Result<T, MenuError>;

#[derive(Debug, thiserror::Error)]
pub enum MenuError {
    #[error("menu source error: {0}")]
    Source(String),
    #[error("menu mirror error: {0}")]
    Mirror(String),
}

/// Canonical-store port: the cache loads everything through this and never
/// writes back. The relational implementation lives with the rest of the
/// database glue, outside this crate.
#[async_trait]
pub trait MenuSource: Send + Sync {
    async fn load_items(&self) -> MenuResult<Vec<MenuItem>>;
    async fn load_categories(&self) -> MenuResult<Vec<MenuCategory>>;
}

/// Fixture-backed source for tests and local development. Contents can be
/// swapped to exercise refresh behaviour.
#[derive(Default)]
pub struct StaticMenuSource {
    items: RwLock<Vec<MenuItem>>,
    categories: RwLock<Vec<MenuCategory>>,
}

impl StaticMenuSource {
    pub fn new(items: Vec<MenuItem>, categories: Vec<MenuCategory>) -> Self {
        Self {
            items: RwLock::new(items),
            categories: RwLock::new(categories),
        }
    }

    pub async fn set_items(&self, items: Vec<MenuItem>) {
        *self.items.write().await = items;
    }

    pub async fn set_categories(&self, categories: Vec<MenuCategory>) {
        *self.categories.write().await = categories;
    }
}

#[async_trait]
impl MenuSource for StaticMenuSource {
    async fn load_items(&self) -> MenuResult<Vec<MenuItem>> {
        Ok(self.items.read().await.clone())
    }

    async fn load_categories(&self) -> MenuResult<Vec<MenuCategory>> {
        Ok(self.categories.read().await.clone())
    }
}

/// Vector-index port for semantic similar-item lookups. Optional; the cache
/// falls back to category and popularity heuristics without it. Returns item
/// ids ranked by similarity. Implementations must not panic into the core.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn similar(&self, query: &str, limit: usize) -> MenuResult<Vec<String>>;
}
