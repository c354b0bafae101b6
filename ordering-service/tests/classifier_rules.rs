use common_observability::SchedulerMetrics;
use llm_service::{
    AccountConfig, AccountPool, AccountProvider, LlmConfig, LlmScheduler, ProviderError,
    ScriptedChatClient,
};
use ordering_service::{
    fallback_classification, EntityStep, OrderingSnapshot, SubIntent, SubIntentClassifier,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn snapshot() -> OrderingSnapshot {
    OrderingSnapshot::default()
}

fn collecting_quantity(item_name: &str) -> OrderingSnapshot {
    let mut snapshot = snapshot();
    snapshot.entity_collection_step = Some(EntityStep::Quantity);
    snapshot
        .pending_entities
        .insert("item_name".to_string(), Value::from(item_name));
    snapshot
}

#[test]
fn digit_during_quantity_collection_is_a_cart_add() {
    let classification = fallback_classification("2", &collecting_quantity("biryani"));
    assert_eq!(classification.sub_intent, SubIntent::ManageCart);
    assert_eq!(classification.entities["action"], json!("add"));
    assert_eq!(classification.entities["quantity"], json!(2));
    assert!(classification.missing_entities.is_empty());
    assert!(classification.confidence >= 0.9);
}

#[test]
fn word_number_during_quantity_collection_is_a_cart_add() {
    let classification = fallback_classification("just two please", &collecting_quantity("naan"));
    assert_eq!(classification.sub_intent, SubIntent::ManageCart);
    assert_eq!(classification.entities["quantity"], json!(2));
}

#[test]
fn checkout_with_validated_cart_executes() {
    let mut state = snapshot();
    state.cart_validated = true;
    let classification = fallback_classification("checkout", &state);
    assert_eq!(classification.sub_intent, SubIntent::ExecuteCheckout);
    assert_eq!(classification.missing_entities, vec!["order_type"]);
    assert!(classification.confidence <= 0.7);
}

#[test]
fn checkout_without_validation_validates_first() {
    let classification = fallback_classification("ready to order", &snapshot());
    assert_eq!(classification.sub_intent, SubIntent::ValidateOrder);
}

#[test]
fn ordering_verb_with_item_is_a_cart_add() {
    let classification = fallback_classification("i want butter chicken", &snapshot());
    assert_eq!(classification.sub_intent, SubIntent::ManageCart);
    assert_eq!(classification.entities["action"], json!("add"));
    assert!(classification.missing_entities.is_empty());
}

#[test]
fn short_ordering_verb_is_missing_the_item_name() {
    let classification = fallback_classification("get me", &snapshot());
    assert_eq!(classification.sub_intent, SubIntent::ManageCart);
    assert_eq!(classification.missing_entities, vec!["item_name"]);
}

#[test]
fn cart_verbs_map_to_actions() {
    let removal = fallback_classification("remove the naan from my cart", &snapshot());
    assert_eq!(removal.sub_intent, SubIntent::ManageCart);
    assert_eq!(removal.entities["action"], json!("remove"));

    let view = fallback_classification("cart", &snapshot());
    assert_eq!(view.entities["action"], json!("view"));
}

#[test]
fn browse_and_discovery_keywords_route_correctly() {
    let browse = fallback_classification("menu", &snapshot());
    assert_eq!(browse.sub_intent, SubIntent::BrowseMenu);

    let discover = fallback_classification("any vegetarian dishes?", &snapshot());
    assert_eq!(discover.sub_intent, SubIntent::DiscoverItems);
    assert_eq!(discover.entities["search_query"], json!("any vegetarian dishes?"));
}

#[test]
fn short_unmatched_message_reads_as_item_selection() {
    let classification = fallback_classification("paneer tikka please", &snapshot());
    assert_eq!(classification.sub_intent, SubIntent::ManageCart);
    assert_eq!(classification.entities["item_name"], json!("paneer tikka"));
    assert_eq!(classification.missing_entities, vec!["quantity"]);
}

#[test]
fn long_unmatched_message_defaults_to_browse() {
    let classification = fallback_classification(
        "my cousin visited last week and said good things about this place overall",
        &snapshot(),
    );
    assert_eq!(classification.sub_intent, SubIntent::BrowseMenu);
    assert!(classification.confidence <= 0.4);
}

// ---------------- structured path via a scripted scheduler ----------------

fn scheduler(client: Arc<ScriptedChatClient>) -> Arc<LlmScheduler> {
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
    Arc::new(LlmScheduler::new(
        AccountPool::from_accounts(vec![account]),
        client,
        &config,
        Arc::new(SchedulerMetrics::new()),
    ))
}

#[tokio::test(start_paused = true)]
async fn structured_path_returns_the_model_classification() {
    let client = Arc::new(ScriptedChatClient::new());
    client.push_structured(Ok(json!({
        "sub_intent": "discover_items",
        "confidence": 0.95,
        "entities": { "search_query": "spicy starters" },
        "missing_entities": [],
        "reasoning": "explicit browse keywords"
    })));
    let classifier = SubIntentClassifier::new(scheduler(client));

    let classification = classifier
        .classify("show me spicy starters", &snapshot())
        .await;
    assert_eq!(classification.sub_intent, SubIntent::DiscoverItems);
    assert!(classification.confidence > 0.9);
}

#[tokio::test(start_paused = true)]
async fn transport_timeout_degrades_to_the_fallback() {
    let client = Arc::new(ScriptedChatClient::new());
    client.push_structured(Err(ProviderError::Timeout));
    let classifier = SubIntentClassifier::new(scheduler(client));

    let classification = classifier
        .classify("3", &collecting_quantity("biryani"))
        .await;
    assert_eq!(classification.sub_intent, SubIntent::ManageCart);
    assert_eq!(classification.entities["action"], json!("add"));
    assert_eq!(classification.entities["quantity"], json!(3));
    assert!(classification.missing_entities.is_empty());
    assert!((classification.confidence - 0.9).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn schema_violation_degrades_to_the_fallback() {
    let client = Arc::new(ScriptedChatClient::new());
    client.push_structured(Ok(json!({ "sub_intent": "made_up_intent", "confidence": 1.0 })));
    let classifier = SubIntentClassifier::new(scheduler(client));

    let classification = classifier.classify("menu", &snapshot()).await;
    assert_eq!(classification.sub_intent, SubIntent::BrowseMenu);
}

#[tokio::test(start_paused = true)]
async fn quantity_collection_overrides_a_wandering_model() {
    // The model ignores the collection context and classifies "2" as
    // discovery; the contract pins it back to the active cart flow.
    let client = Arc::new(ScriptedChatClient::new());
    client.push_structured(Ok(json!({
        "sub_intent": "discover_items",
        "confidence": 0.6,
        "entities": {},
        "missing_entities": [],
        "reasoning": "looks like a number"
    })));
    let classifier = SubIntentClassifier::new(scheduler(client));

    let classification = classifier
        .classify("2", &collecting_quantity("biryani"))
        .await;
    assert_eq!(classification.sub_intent, SubIntent::ManageCart);
    assert_eq!(classification.entities["quantity"], json!(2));
    assert!(classification.confidence >= 0.9);
}
