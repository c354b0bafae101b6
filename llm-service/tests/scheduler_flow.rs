use std::sync::Arc;
use std::time::Duration;

use common_observability::SchedulerMetrics;
use llm_service::{
    AccountConfig, AccountPool, AccountProvider, ChatMessage, ChatResponse, LlmConfig, LlmError,
    LlmScheduler, ModelTier, ProviderError, ScriptedChatClient,
};
use serde::Deserialize;

fn test_config() -> LlmConfig {
    LlmConfig {
        accounts: Vec::new(),
        fallback_api_key: None,
        cooldown: Duration::from_secs(60),
        retry_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_secs(5),
        api_base_url: "http://localhost".into(),
        primary_model: "gpt-4o".into(),
        mini_model: "gpt-4o-mini".into(),
    }
}

fn account(number: u32, key: &str, rpm: u32) -> Arc<AccountProvider> {
    let mut config = AccountConfig::with_defaults(number, key.into());
    config.mini_rpm = rpm;
    config.primary_rpm = rpm;
    Arc::new(AccountProvider::new(&config))
}

fn scheduler_with(
    accounts: Vec<Arc<AccountProvider>>,
    client: Arc<ScriptedChatClient>,
) -> LlmScheduler {
    LlmScheduler::new(
        AccountPool::from_accounts(accounts),
        client,
        &test_config(),
        Arc::new(SchedulerMetrics::new()),
    )
}

#[test]
fn token_estimate_has_floor_and_margin() {
    let tiny = [ChatMessage::user("hi")];
    assert_eq!(LlmScheduler::estimate_tokens(&tiny), 100);

    let long = [ChatMessage::user("x".repeat(1000))];
    // 1000 chars / 4 * 1.2 = 300
    assert_eq!(LlmScheduler::estimate_tokens(&long), 300);
}

#[tokio::test(start_paused = true)]
async fn round_robin_rotates_across_accounts() {
    let client = Arc::new(ScriptedChatClient::new());
    let scheduler = scheduler_with(
        vec![
            account(1, "key-1", 1000),
            account(2, "key-2", 1000),
            account(3, "key-3", 1000),
        ],
        client.clone(),
    );

    let messages = [ChatMessage::user("hello")];
    for _ in 0..4 {
        scheduler
            .invoke(&messages, ModelTier::Mini, None)
            .await
            .unwrap();
    }

    let keys: Vec<String> = client.calls().into_iter().map(|call| call.api_key).collect();
    assert_eq!(keys, vec!["key-1", "key-2", "key-3", "key-1"]);
}

#[tokio::test(start_paused = true)]
async fn cooldown_cycle_rejects_then_recovers() {
    // RPM 10, buffer 80: the 8th dispatch trips the tracker into cooling.
    let client = Arc::new(ScriptedChatClient::new());
    let scheduler = scheduler_with(vec![account(1, "key-1", 10)], client.clone());
    let messages = [ChatMessage::user("hello")];

    for _ in 0..8 {
        scheduler
            .invoke(&messages, ModelTier::Mini, None)
            .await
            .unwrap();
    }

    // Ninth call: the only account is cooling, so the retry loop runs out of
    // road and reports the per-account snapshot.
    let err = scheduler
        .invoke(&messages, ModelTier::Mini, None)
        .await
        .unwrap_err();
    match err {
        LlmError::CapacityExhausted {
            accounts, snapshot, ..
        } => {
            assert_eq!(accounts, 1);
            assert_eq!(snapshot.len(), 1);
        }
        other => panic!("expected CapacityExhausted, got {other:?}"),
    }

    // The failed attempt consumed the 30s retry window; after the 60s sliding
    // window drains past the original dispatches the account recovers.
    tokio::time::advance(Duration::from_secs(61)).await;
    scheduler
        .invoke(&messages, ModelTier::Mini, None)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn cooled_account_is_skipped_for_the_next_one() {
    let cold = account(1, "key-cold", 10);
    for _ in 0..8 {
        cold.record_request(ModelTier::Mini, 100, Duration::from_secs(60))
            .await;
    }
    let client = Arc::new(ScriptedChatClient::new());
    let scheduler = scheduler_with(vec![cold, account(2, "key-warm", 1000)], client.clone());

    scheduler
        .invoke(&[ChatMessage::user("hello")], ModelTier::Mini, None)
        .await
        .unwrap();

    let calls = client.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].api_key, "key-warm");
}

#[tokio::test(start_paused = true)]
async fn provider_failure_is_not_charged_against_the_budget() {
    let client = Arc::new(ScriptedChatClient::new());
    client.push_completion(Err(ProviderError::RateLimited("slow down".into())));
    let scheduler = scheduler_with(vec![account(1, "key-1", 100)], client.clone());

    let err = scheduler
        .invoke(&[ChatMessage::user("hello")], ModelTier::Mini, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::Provider(_)));

    let stats = scheduler.usage_stats_for(ModelTier::Mini).await;
    assert_eq!(stats[0].current_rpm, 0);
    assert_eq!(stats[0].current_tpm, 0);
}

#[tokio::test(start_paused = true)]
async fn successful_dispatch_records_exactly_once() {
    let client = Arc::new(ScriptedChatClient::new());
    let scheduler = scheduler_with(
        vec![account(1, "key-1", 100), account(2, "key-2", 100)],
        client.clone(),
    );

    scheduler
        .invoke(&[ChatMessage::user("hello")], ModelTier::Mini, None)
        .await
        .unwrap();

    let stats = scheduler.usage_stats_for(ModelTier::Mini).await;
    let recorded: usize = stats.iter().map(|s| s.current_rpm).sum();
    assert_eq!(recorded, 1);
    // The other tier's budget is untouched.
    let primary: usize = scheduler
        .usage_stats_for(ModelTier::Primary)
        .await
        .iter()
        .map(|s| s.current_rpm)
        .sum();
    assert_eq!(primary, 0);
}

#[derive(Debug, Deserialize)]
struct FakeClassification {
    label: String,
    confidence: f64,
}

#[tokio::test(start_paused = true)]
async fn structured_output_deserializes_into_caller_type() {
    let client = Arc::new(ScriptedChatClient::new());
    client.push_structured(Ok(serde_json::json!({
        "label": "greeting",
        "confidence": 0.92
    })));
    let scheduler = scheduler_with(vec![account(1, "key-1", 100)], client.clone());

    let schema = serde_json::json!({ "type": "object" });
    let parsed: FakeClassification = scheduler
        .invoke_structured(
            &[ChatMessage::user("hi")],
            "classify",
            &schema,
            ModelTier::Mini,
            Some(0.1),
        )
        .await
        .unwrap();
    assert_eq!(parsed.label, "greeting");
    assert!(parsed.confidence > 0.9);
}

#[tokio::test(start_paused = true)]
async fn schema_mismatch_is_surfaced_but_still_charged() {
    let client = Arc::new(ScriptedChatClient::new());
    client.push_structured(Ok(serde_json::json!({ "unexpected": true })));
    let scheduler = scheduler_with(vec![account(1, "key-1", 100)], client.clone());

    let schema = serde_json::json!({ "type": "object" });
    let err = scheduler
        .invoke_structured::<FakeClassification>(
            &[ChatMessage::user("hi")],
            "classify",
            &schema,
            ModelTier::Mini,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::SchemaMismatch(_)));

    // The provider call itself succeeded, so the budget was charged.
    let stats = scheduler.usage_stats_for(ModelTier::Mini).await;
    assert_eq!(stats[0].current_rpm, 1);
}

#[tokio::test(start_paused = true)]
async fn pool_build_excludes_quota_exhausted_accounts() {
    // Six accounts; probes two report exhausted quota in the error body.
    let client = ScriptedChatClient::new();
    for number in 1..=6u32 {
        if number == 2 || number == 5 {
            client.push_completion(Err(ProviderError::RateLimited(
                "You exceeded your current quota: insufficient_quota".into(),
            )));
        } else {
            client.push_completion(Ok(ChatResponse {
                content: "hi".into(),
                model: "gpt-4o-mini".into(),
            }));
        }
    }

    let mut config = test_config();
    config.accounts = (1..=6u32)
        .map(|number| AccountConfig::with_defaults(number, format!("key-{number}")))
        .collect();

    let pool = AccountPool::build(&config, &client).await.unwrap();
    assert_eq!(pool.len(), 4);

    // Later dispatches never touch the excluded keys.
    let client = Arc::new(client);
    let scheduler = LlmScheduler::new(
        pool,
        client.clone(),
        &config,
        Arc::new(SchedulerMetrics::new()),
    );
    for _ in 0..8 {
        scheduler
            .invoke(&[ChatMessage::user("hello")], ModelTier::Mini, None)
            .await
            .unwrap();
    }
    for call in client.calls().into_iter().skip(6) {
        assert_ne!(call.api_key, "key-2");
        assert_ne!(call.api_key, "key-5");
    }
}

#[tokio::test(start_paused = true)]
async fn empty_pool_without_fallback_aborts_startup() {
    let client = ScriptedChatClient::new();
    client.push_completion(Err(ProviderError::Unauthorized("bad key".into())));

    let mut config = test_config();
    config.accounts = vec![AccountConfig::with_defaults(1, "key-1".into())];

    let err = AccountPool::build(&config, &client).await.unwrap_err();
    assert!(matches!(err, LlmError::NoValidAccounts));
}

#[tokio::test(start_paused = true)]
async fn fallback_key_rescues_an_empty_pool() {
    let client = ScriptedChatClient::new();
    // Configured account fails auth, fallback key probes clean.
    client.push_completion(Err(ProviderError::Unauthorized("bad key".into())));
    client.push_completion(Ok(ChatResponse {
        content: "hi".into(),
        model: "gpt-4o-mini".into(),
    }));

    let mut config = test_config();
    config.accounts = vec![AccountConfig::with_defaults(1, "key-dead".into())];
    config.fallback_api_key = Some("key-fallback".into());

    let pool = AccountPool::build(&config, &client).await.unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.accounts()[0].api_key(), "key-fallback");
}
