use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};

use crate::model::{MealPeriod, MenuCategory, MenuItem};
use crate::source::{MenuError, MenuResult, MenuSource, SimilarityIndex};

const FUZZY_MATCH_THRESHOLD: f64 = 0.75;

#[derive(Default)]
struct MenuSnapshot {
    items: HashMap<String, Arc<MenuItem>>,
    categories: HashMap<String, MenuCategory>,
    by_category: HashMap<String, Vec<String>>,
    loaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct MenuCacheStats {
    pub items: usize,
    pub categories: usize,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Hot, read-mostly snapshot of the menu.
///
/// Loaded exhaustively from the canonical source at startup and swapped
/// wholesale on refresh; carts keep copied name/price so a swap never breaks
/// them. Optionally mirrors each snapshot into Redis for out-of-process
/// readers.
pub struct MenuCache {
    source: Arc<dyn MenuSource>,
    similarity: Option<Arc<dyn SimilarityIndex>>,
    mirror: Option<ConnectionManager>,
    snapshot: RwLock<MenuSnapshot>,
}

impl MenuCache {
    /// Build the cache and perform the initial exhaustive load.
    pub async fn load(
        source: Arc<dyn MenuSource>,
        similarity: Option<Arc<dyn SimilarityIndex>>,
        mirror: Option<ConnectionManager>,
    ) -> MenuResult<Arc<Self>> {
        let cache = Arc::new(Self {
            source,
            similarity,
            mirror,
            snapshot: RwLock::new(MenuSnapshot::default()),
        });
        cache.refresh().await?;
        Ok(cache)
    }

    /// Re-load everything from the canonical source and swap the snapshot.
    pub async fn refresh(&self) -> MenuResult<()> {
        let loaded_at = Utc::now();
        let mut items = self.source.load_items().await?;
        let categories = self.source.load_categories().await?;
        for item in &mut items {
            item.cached_at = loaded_at;
        }

        let mut snapshot = MenuSnapshot {
            loaded_at: Some(loaded_at),
            ..MenuSnapshot::default()
        };
        for category in categories {
            snapshot.by_category.entry(category.id.clone()).or_default();
            snapshot.categories.insert(category.id.clone(), category);
        }
        for item in items {
            if let Some(category_id) = &item.category_id {
                snapshot
                    .by_category
                    .entry(category_id.clone())
                    .or_default()
                    .push(item.id.clone());
            }
            snapshot.items.insert(item.id.clone(), Arc::new(item));
        }

        let item_count = snapshot.items.len();
        let category_count = snapshot.categories.len();
        let mirror_items: Vec<Arc<MenuItem>> = snapshot.items.values().cloned().collect();
        let mirror_categories: Vec<MenuCategory> = snapshot.categories.values().cloned().collect();
        let mirror_index: Vec<(String, Vec<String>)> = snapshot
            .by_category
            .iter()
            .map(|(id, item_ids)| (id.clone(), item_ids.clone()))
            .collect();

        *self.snapshot.write().await = snapshot;
        tracing::info!(
            items = item_count,
            categories = category_count,
            "menu cache refreshed"
        );

        // The mirror is best-effort: readers of this process always see the
        // in-memory snapshot.
        if let Some(conn) = &self.mirror {
            if let Err(err) = self
                .mirror_snapshot(conn.clone(), &mirror_items, &mirror_categories, &mirror_index)
                .await
            {
                tracing::warn!(error = %err, "failed to mirror menu snapshot to redis");
            }
        }
        Ok(())
    }

    /// Periodic refresh loop; the first tick fires after `every`.
    pub fn spawn_refresh_task(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = cache.refresh().await {
                    tracing::warn!(error = %err, "scheduled menu refresh failed");
                }
            }
        })
    }

    async fn mirror_snapshot(
        &self,
        mut conn: ConnectionManager,
        items: &[Arc<MenuItem>],
        categories: &[MenuCategory],
        index: &[(String, Vec<String>)],
    ) -> MenuResult<()> {
        let mut pipe = redis::pipe();
        pipe.del("menu:items:all").ignore();
        pipe.del("menu:categories:all").ignore();
        for item in items {
            let payload =
                serde_json::to_string(item.as_ref()).map_err(|err| MenuError::Mirror(err.to_string()))?;
            pipe.set(format!("menu:item:{}", item.id), payload).ignore();
            pipe.sadd("menu:items:all", &item.id).ignore();
        }
        for category in categories {
            let payload =
                serde_json::to_string(category).map_err(|err| MenuError::Mirror(err.to_string()))?;
            pipe.set(format!("menu:category:{}", category.id), payload)
                .ignore();
            pipe.sadd("menu:categories:all", &category.id).ignore();
        }
        for (category_id, item_ids) in index {
            let key = format!("menu:category:{category_id}:items");
            pipe.del(&key).ignore();
            if !item_ids.is_empty() {
                pipe.sadd(&key, item_ids.clone()).ignore();
            }
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|err| MenuError::Mirror(err.to_string()))?;
        Ok(())
    }

    pub async fn get_item(&self, item_id: &str) -> Option<Arc<MenuItem>> {
        self.snapshot.read().await.items.get(item_id).cloned()
    }

    pub async fn get_category(&self, category_id: &str) -> Option<MenuCategory> {
        self.snapshot.read().await.categories.get(category_id).cloned()
    }

    pub async fn categories(&self) -> Vec<MenuCategory> {
        let snapshot = self.snapshot.read().await;
        let mut categories: Vec<MenuCategory> = snapshot.categories.values().cloned().collect();
        categories.sort_by_key(|category| category.display_order);
        categories
    }

    pub async fn items_by_category(&self, category_id: &str) -> Vec<Arc<MenuItem>> {
        let snapshot = self.snapshot.read().await;
        snapshot
            .by_category
            .get(category_id)
            .map(|item_ids| {
                item_ids
                    .iter()
                    .filter_map(|id| snapshot.items.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn all_items(&self) -> Vec<Arc<MenuItem>> {
        self.snapshot.read().await.items.values().cloned().collect()
    }

    /// Case-insensitive exact-name lookup over the whole menu, including
    /// currently unavailable items; cart resolution needs those to produce a
    /// distinct "unavailable" answer rather than "not found".
    pub async fn find_by_exact_name(&self, name: &str) -> Option<Arc<MenuItem>> {
        let wanted = name.trim().to_lowercase();
        let snapshot = self.snapshot.read().await;
        snapshot
            .items
            .values()
            .find(|item| item.name.to_lowercase() == wanted)
            .cloned()
    }

    /// Multi-stage name resolution over sellable items: exact match, then
    /// substring preferring the longest item name, then fuzzy at >= 0.75.
    pub async fn find_item(&self, name: &str) -> Option<Arc<MenuItem>> {
        let query = name.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }
        let snapshot = self.snapshot.read().await;
        let sellable: Vec<&Arc<MenuItem>> = snapshot
            .items
            .values()
            .filter(|item| item.is_sellable())
            .collect();

        if let Some(item) = sellable
            .iter()
            .find(|item| item.name.to_lowercase() == query)
        {
            return Some(Arc::clone(item));
        }

        let substring_match = sellable
            .iter()
            .filter(|item| {
                let item_name = item.name.to_lowercase();
                item_name.contains(&query) || query.contains(&item_name)
            })
            .max_by_key(|item| item.name.len());
        if let Some(item) = substring_match {
            return Some(Arc::clone(item));
        }

        sellable
            .iter()
            .map(|item| {
                let ratio = strsim::normalized_levenshtein(&query, &item.name.to_lowercase());
                (item, ratio)
            })
            .filter(|(_, ratio)| *ratio >= FUZZY_MATCH_THRESHOLD)
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(item, _)| Arc::clone(item))
    }

    /// Substring search over sellable items. `strict` restricts matching to
    /// item names; otherwise description and category names match too. An
    /// optional meal period narrows results to items served then.
    pub async fn search(
        &self,
        query: &str,
        meal_period: Option<MealPeriod>,
        strict: bool,
    ) -> Vec<Arc<MenuItem>> {
        let needle = query.trim().to_lowercase();
        let snapshot = self.snapshot.read().await;
        let mut matches: Vec<Arc<MenuItem>> = snapshot
            .items
            .values()
            .filter(|item| item.is_sellable())
            .filter(|item| {
                if needle.is_empty() {
                    return true;
                }
                let in_name = item.name.to_lowercase().contains(&needle);
                if strict {
                    in_name
                } else {
                    in_name
                        || item.description.to_lowercase().contains(&needle)
                        || item.category_name.to_lowercase().contains(&needle)
                }
            })
            .filter(|item| {
                meal_period
                    .map(|period| item.available_during(period))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        matches
    }

    /// Alternatives for an item, semantic first when a vector index is
    /// wired, then same-category, then popular items. The index failing is
    /// never fatal.
    pub async fn similar_items(
        &self,
        query: &str,
        exclude_item_id: &str,
        limit: usize,
    ) -> Vec<Arc<MenuItem>> {
        if let Some(index) = &self.similarity {
            match index.similar(query, limit + 1).await {
                Ok(item_ids) => {
                    let mut found = Vec::new();
                    for item_id in item_ids {
                        if item_id == exclude_item_id {
                            continue;
                        }
                        if let Some(item) = self.get_item(&item_id).await {
                            if item.is_sellable() {
                                found.push(item);
                            }
                        }
                        if found.len() == limit {
                            break;
                        }
                    }
                    if !found.is_empty() {
                        return found;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "similarity index lookup failed, using fallback");
                }
            }
        }

        // Same category as the excluded item.
        if let Some(excluded) = self.get_item(exclude_item_id).await {
            if let Some(category_id) = &excluded.category_id {
                let siblings: Vec<Arc<MenuItem>> = self
                    .items_by_category(category_id)
                    .await
                    .into_iter()
                    .filter(|item| item.id != exclude_item_id && item.is_sellable())
                    .take(limit)
                    .collect();
                if !siblings.is_empty() {
                    return siblings;
                }
            }
        }

        // Popular alternatives as the last resort.
        let snapshot = self.snapshot.read().await;
        snapshot
            .items
            .values()
            .filter(|item| item.id != exclude_item_id && item.is_popular && item.is_sellable())
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn current_meal_period() -> MealPeriod {
        MealPeriod::current(chrono::Local::now())
    }

    pub async fn stats(&self) -> MenuCacheStats {
        let snapshot = self.snapshot.read().await;
        MenuCacheStats {
            items: snapshot.items.len(),
            categories: snapshot.categories.len(),
            loaded_at: snapshot.loaded_at,
        }
    }
}
