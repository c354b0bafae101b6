use async_trait::async_trait;
use chrono::Utc;
use common_money::Money;
use menu_service::{
    MealPeriod, MenuCache, MenuCategory, MenuError, MenuItem, SimilarityIndex, StaticMenuSource,
};
use std::sync::Arc;

fn item(id: &str, name: &str, paise: i64, category: Option<&str>) -> MenuItem {
    MenuItem {
        id: id.to_string(),
        name: name.to_string(),
        price: Money::from_paise(paise),
        category_id: category.map(str::to_string),
        category_name: category.unwrap_or_default().to_string(),
        description: String::new(),
        is_available: true,
        is_popular: false,
        spice_level: None,
        calories: None,
        prep_minutes: None,
        availability_periods: Vec::new(),
        cached_at: Utc::now(),
    }
}

fn category(id: &str, name: &str, display_order: i32) -> MenuCategory {
    MenuCategory {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
        display_order,
    }
}

fn sample_menu() -> Vec<MenuItem> {
    vec![
        item("itm1", "Butter Chicken", 32000, Some("cat-mains")),
        item("itm2", "Paneer Butter Masala", 28000, Some("cat-mains")),
        item("itm3", "Veg Roll", 12000, Some("cat-starters")),
        item("itm4", "Paneer Veg Roll Special", 16000, Some("cat-starters")),
        item("itm5", "Plain Naan", 4000, Some("cat-breads")),
    ]
}

fn sample_categories() -> Vec<MenuCategory> {
    vec![
        category("cat-starters", "Starters", 1),
        category("cat-mains", "Main Course", 2),
        category("cat-breads", "Breads", 3),
    ]
}

async fn cache_with(items: Vec<MenuItem>) -> Arc<MenuCache> {
    let source = Arc::new(StaticMenuSource::new(items, sample_categories()));
    MenuCache::load(source, None, None).await.unwrap()
}

#[tokio::test]
async fn exact_name_match_is_case_insensitive() {
    let cache = cache_with(sample_menu()).await;
    let found = cache.find_item("butter chicken").await.unwrap();
    assert_eq!(found.id, "itm1");
}

#[tokio::test]
async fn substring_match_prefers_the_longest_name() {
    let cache = cache_with(sample_menu()).await;
    let found = cache.find_item("veg roll").await.unwrap();
    // Exact beats substring, so drop the exact candidate first.
    assert_eq!(found.id, "itm3");

    let menu: Vec<MenuItem> = sample_menu()
        .into_iter()
        .filter(|item| item.id != "itm3")
        .collect();
    let cache = cache_with(menu).await;
    let found = cache.find_item("veg roll").await.unwrap();
    assert_eq!(found.id, "itm4");
}

#[tokio::test]
async fn fuzzy_match_catches_typos() {
    let cache = cache_with(sample_menu()).await;
    let found = cache.find_item("buter chiken").await.unwrap();
    assert_eq!(found.id, "itm1");

    assert!(cache.find_item("margherita pizza").await.is_none());
}

#[tokio::test]
async fn zero_priced_items_never_surface() {
    let mut menu = sample_menu();
    menu.push(item("itm-free", "Complimentary Papad", 0, Some("cat-starters")));
    let cache = cache_with(menu).await;

    assert!(cache.find_item("complimentary papad").await.is_none());
    assert!(cache
        .search("papad", None, false)
        .await
        .iter()
        .all(|item| item.id != "itm-free"));
    // Direct id lookup still works; it is not a search path.
    assert!(cache.get_item("itm-free").await.is_some());
}

#[tokio::test]
async fn search_strict_restricts_to_names() {
    let mut menu = sample_menu();
    menu[4].description = "Butter-brushed flatbread".to_string();
    let cache = cache_with(menu).await;

    let loose: Vec<String> = cache
        .search("butter", None, false)
        .await
        .iter()
        .map(|item| item.id.clone())
        .collect();
    assert!(loose.contains(&"itm5".to_string()));

    let strict: Vec<String> = cache
        .search("butter", None, true)
        .await
        .iter()
        .map(|item| item.id.clone())
        .collect();
    assert_eq!(strict, vec!["itm1".to_string(), "itm2".to_string()]);
}

#[tokio::test]
async fn meal_period_filters_scheduled_items() {
    let mut menu = sample_menu();
    menu[0].availability_periods = vec![MealPeriod::Dinner];
    menu[2].availability_periods = vec![MealPeriod::AllDay];
    let cache = cache_with(menu).await;

    let breakfast = cache.search("", Some(MealPeriod::Breakfast), false).await;
    assert!(breakfast.iter().all(|item| item.id != "itm1"));
    // all_day-tagged and unrestricted items pass every filter.
    assert!(breakfast.iter().any(|item| item.id == "itm3"));
    assert!(breakfast.iter().any(|item| item.id == "itm5"));

    let dinner = cache.search("", Some(MealPeriod::Dinner), false).await;
    assert!(dinner.iter().any(|item| item.id == "itm1"));
}

#[tokio::test]
async fn similar_items_fall_back_to_same_category() {
    let cache = cache_with(sample_menu()).await;
    let alternatives = cache.similar_items("butter chicken", "itm1", 2).await;
    assert_eq!(alternatives.len(), 1);
    assert_eq!(alternatives[0].id, "itm2");
}

#[tokio::test]
async fn similar_items_fall_back_to_popular_when_category_is_empty() {
    let mut menu = sample_menu();
    menu[4].is_popular = true;
    // Excluded item is alone in its category.
    menu.retain(|item| item.id != "itm2");
    let cache = cache_with(menu).await;

    let alternatives = cache.similar_items("butter chicken", "itm1", 2).await;
    assert_eq!(alternatives.len(), 1);
    assert_eq!(alternatives[0].id, "itm5");
}

struct FixedIndex(Vec<String>);

#[async_trait]
impl SimilarityIndex for FixedIndex {
    async fn similar(&self, _query: &str, _limit: usize) -> Result<Vec<String>, MenuError> {
        Ok(self.0.clone())
    }
}

struct BrokenIndex;

#[async_trait]
impl SimilarityIndex for BrokenIndex {
    async fn similar(&self, _query: &str, _limit: usize) -> Result<Vec<String>, MenuError> {
        Err(MenuError::Source("vector index offline".into()))
    }
}

#[tokio::test]
async fn similarity_index_takes_priority_when_present() {
    let source = Arc::new(StaticMenuSource::new(sample_menu(), sample_categories()));
    let index = Arc::new(FixedIndex(vec!["itm1".into(), "itm5".into(), "itm2".into()]));
    let cache = MenuCache::load(source, Some(index), None).await.unwrap();

    let alternatives = cache.similar_items("butter chicken", "itm1", 2).await;
    let ids: Vec<&str> = alternatives.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, vec!["itm5", "itm2"]);
}

#[tokio::test]
async fn broken_similarity_index_degrades_to_fallback() {
    let source = Arc::new(StaticMenuSource::new(sample_menu(), sample_categories()));
    let cache = MenuCache::load(source, Some(Arc::new(BrokenIndex)), None)
        .await
        .unwrap();

    let alternatives = cache.similar_items("butter chicken", "itm1", 2).await;
    assert_eq!(alternatives[0].id, "itm2");
}

#[tokio::test]
async fn refresh_swaps_the_snapshot() {
    let source = Arc::new(StaticMenuSource::new(sample_menu(), sample_categories()));
    let cache = MenuCache::load(source.clone(), None, None).await.unwrap();
    assert!(cache.get_item("itm1").await.is_some());

    let mut updated = sample_menu();
    updated.retain(|item| item.id != "itm1");
    updated.push(item("itm9", "Chicken 65", 22000, Some("cat-starters")));
    source.set_items(updated).await;
    cache.refresh().await.unwrap();

    assert!(cache.get_item("itm1").await.is_none());
    assert_eq!(cache.find_item("chicken 65").await.unwrap().id, "itm9");
    assert_eq!(cache.stats().await.items, 5);
}

#[tokio::test]
async fn categories_sort_by_display_order() {
    let cache = cache_with(sample_menu()).await;
    let names: Vec<String> = cache
        .categories()
        .await
        .into_iter()
        .map(|category| category.name)
        .collect();
    assert_eq!(names, vec!["Starters", "Main Course", "Breads"]);

    let starters = cache.items_by_category("cat-starters").await;
    assert_eq!(starters.len(), 2);
}
