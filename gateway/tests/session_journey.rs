use chat_gateway::{AppMetrics, AppServices};
use cart_service::{InMemoryCartStore, SessionRef};
use chrono::Utc;
use common_money::Money;
use identity_service::{InMemoryIdentityStore, SessionTokenCodec, TokenConfig, Tier};
use inventory_service::{InMemoryInventoryStore, InventoryStore, StockLevel};
use llm_service::{
    AccountConfig, AccountPool, AccountProvider, LlmConfig, LlmScheduler, ProviderError,
    ScriptedChatClient,
};
use menu_service::{MenuCategory, MenuCache, MenuItem, StaticMenuSource};
use ordering_service::{OrderingSnapshot, SubIntent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn menu_item(id: &str, name: &str, paise: i64) -> MenuItem {
    MenuItem {
        id: id.to_string(),
        name: name.to_string(),
        price: Money::from_paise(paise),
        category_id: Some("cat-mains".into()),
        category_name: "Main Course".into(),
        description: String::new(),
        is_available: true,
        is_popular: true,
        spice_level: None,
        calories: None,
        prep_minutes: None,
        availability_periods: Vec::new(),
        cached_at: Utc::now(),
    }
}

async fn services(client: Arc<ScriptedChatClient>) -> AppServices {
    let config = LlmConfig {
        accounts: Vec::new(),
        fallback_api_key: None,
        cooldown: Duration::from_secs(60),
        retry_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_secs(5),
        api_base_url: "http://localhost".into(),
        primary_model: "gpt-4o".into(),
        mini_model: "gpt-4o-mini".into(),
    };
    let account = Arc::new(AccountProvider::new(&AccountConfig::with_defaults(
        1,
        "key-1".into(),
    )));
    let metrics = AppMetrics::default();
    let scheduler = Arc::new(LlmScheduler::new(
        AccountPool::from_accounts(vec![account]),
        client,
        &config,
        metrics.scheduler.clone(),
    ));

    let menu = MenuCache::load(
        Arc::new(StaticMenuSource::new(
            vec![
                menu_item("itm-biryani", "Chicken Biryani", 32000),
                menu_item("itm-butter", "Butter Chicken", 34000),
            ],
            vec![MenuCategory {
                id: "cat-mains".into(),
                name: "Main Course".into(),
                description: String::new(),
                display_order: 1,
            }],
        )),
        None,
        None,
    )
    .await
    .unwrap();

    let inventory = Arc::new(InMemoryInventoryStore::with_metrics(
        metrics.inventory.clone(),
    ));
    inventory
        .sync_from_canonical(&[
            StockLevel {
                item_id: "itm-biryani".into(),
                available: 3,
            },
            StockLevel {
                item_id: "itm-butter".into(),
                available: 5,
            },
        ])
        .await
        .unwrap();

    AppServices::from_parts(
        scheduler,
        inventory,
        menu,
        Arc::new(InMemoryCartStore::new()),
        Arc::new(InMemoryIdentityStore::new()),
        SessionTokenCodec::new("test-secret", TokenConfig::default()),
        metrics,
        2,
        7,
    )
}

/// The representative request path: identify the tier, classify the message,
/// run the cart operation, then confirm at checkout, with the structured
/// classifier degraded to its fallback by a provider outage along the way.
#[tokio::test(start_paused = true)]
async fn anonymous_order_journey_end_to_end() {
    let client = Arc::new(ScriptedChatClient::new());
    let app = services(client.clone()).await;

    // Tier resolution: nothing presented, fully anonymous.
    let recognition = app.identity.recognize(None, None).await.unwrap();
    assert_eq!(recognition.tier, Tier::Anonymous);
    let session = SessionRef::anonymous("sess-1");

    // The provider times out; the classifier must still produce a usable
    // classification from its keyword rules.
    client.push_structured(Err(ProviderError::Timeout));
    let classification = app
        .classifier
        .classify("i want chicken biryani", &OrderingSnapshot::default())
        .await;
    assert_eq!(classification.sub_intent, SubIntent::ManageCart);
    assert_eq!(classification.entities["action"], json!("add"));

    // Cart add reserves before writing.
    let op = app
        .carts
        .add(&session, "chicken biryani", 2)
        .await
        .unwrap();
    assert_eq!(op.cart_subtotal, Money::from_paise(64000));
    assert_eq!(app.inventory.available("itm-biryani").await.unwrap(), 1);

    // Checkout consumes the reservation for good.
    let confirmed = app.carts.checkout(&session).await.unwrap();
    assert_eq!(confirmed.items.len(), 1);
    assert_eq!(app.inventory.available("itm-biryani").await.unwrap(), 1);
    assert_eq!(
        app.inventory.reserved_total("itm-biryani").await.unwrap(),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn authentication_upgrades_the_session_and_migrates_holdings() {
    let client = Arc::new(ScriptedChatClient::new());
    let app = services(client.clone()).await;

    // Anonymous shopping first.
    let anonymous = SessionRef::anonymous("sess-1");
    app.carts.add(&anonymous, "itm-butter", 1).await.unwrap();

    // OTP verified upstream; bind the device and issue a session token.
    let token = app
        .identity
        .authenticate("usr-1", Some("dev-1"))
        .await
        .unwrap();
    let recognition = app
        .identity
        .recognize(Some("dev-1"), Some(&token))
        .await
        .unwrap();
    assert_eq!(recognition.tier, Tier::Authenticated);

    // Login hydrates and re-keys the holdings to the user.
    let session = SessionRef::authenticated("sess-1", "usr-1");
    app.user_data.on_login("usr-1", &session).await.unwrap();
    assert_eq!(
        app.inventory.reservations_for("itm-butter").await.unwrap(),
        vec!["usr-1"]
    );

    // Logout releases everything and leaves a restorable snapshot behind.
    app.user_data
        .on_logout("usr-1", &session, None)
        .await
        .unwrap();
    assert_eq!(app.inventory.reserved_total("itm-butter").await.unwrap(), 0);

    let payload = app.user_data.on_login("usr-1", &session).await.unwrap();
    let restoration = payload.cart_restoration.expect("snapshot offered");
    assert!(restoration.all_available);

    let restored = app.user_data.restore_cart("usr-1", &session).await.unwrap();
    assert_eq!(restored.items.len(), 1);
    assert_eq!(app.inventory.reserved_total("itm-butter").await.unwrap(), 1);
}
