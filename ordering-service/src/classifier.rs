use std::sync::Arc;

use llm_service::{ChatMessage, LlmScheduler, ModelTier};
use serde_json::Value;

use crate::fallback::fallback_classification;
use crate::state::{Classification, EntityStep, OrderingSnapshot, SubIntent};

const CLASSIFICATION_TEMPERATURE: f32 = 0.1;

const SYSTEM_PROMPT: &str = r#"You are a food ordering intent classifier.

Classify the user's message into exactly ONE sub-intent and extract entities.

Sub-intents:
1. browse_menu - navigate the menu structure ("show menu", "what categories do you have")
2. discover_items - explicit searching or filtering; requires browse keywords such as
   "show me", "what is", "search", "find", "tell me about", "recommend", "options", "available"
3. manage_cart - add/remove/update cart items, or ordering an item by name.
   A bare item name with no browse keywords is manage_cart with action "add".
   Do not invent a quantity: if the user did not state one, put "quantity" in missing_entities.
4. validate_order - the user explicitly signals they are DONE selecting ("checkout", "ready to order")
5. execute_checkout - confirm after validation; requires order_type (dine_in or takeout)

Entities: action (required for manage_cart: add/remove/update/view/clear), item_name,
quantity, category_name, search_query, dietary_restrictions, price_range, order_type,
item_index (1-indexed, including ordinals like "the second one").

If the context says an entity is being collected, the user is answering that question:
keep the current sub-intent and read the message as a value for that entity. A bare
number while collecting quantity is manage_cart with action "add" and that quantity,
never a new intent.

Return only an instance of the provided schema."#;

/// LLM classification with a schema-constrained response and a deterministic
/// keyword fallback. The fallback fires on scheduler timeouts, provider
/// failures, and schema violations, so callers always get a usable
/// classification.
pub struct SubIntentClassifier {
    scheduler: Arc<LlmScheduler>,
}

impl SubIntentClassifier {
    pub fn new(scheduler: Arc<LlmScheduler>) -> Self {
        Self { scheduler }
    }

    pub async fn classify(
        &self,
        user_message: &str,
        snapshot: &OrderingSnapshot,
    ) -> Classification {
        let context = build_context(snapshot);
        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Context:\n{context}\n\nUser message: \"{user_message}\"\n\nClassify intent and extract entities."
            )),
        ];

        let result = self
            .scheduler
            .invoke_structured::<Classification>(
                &messages,
                "classify_sub_intent",
                &Classification::schema(),
                ModelTier::Mini,
                Some(CLASSIFICATION_TEMPERATURE),
            )
            .await;

        let classification = match result {
            Ok(classification) => {
                tracing::info!(
                    sub_intent = classification.sub_intent.as_str(),
                    confidence = classification.confidence,
                    "sub-intent classified"
                );
                classification
            }
            Err(err) => {
                tracing::warn!(error = %err, "structured classification failed, using fallback");
                fallback_classification(user_message, snapshot)
            }
        };

        enforce_collection_priority(user_message, snapshot, classification)
    }
}

/// The priority rule is a hard contract, not a prompt hint: while an entity
/// is being collected the active sub-intent is preserved and the message is
/// interpreted as that entity's value, whichever path produced the
/// classification.
fn enforce_collection_priority(
    user_message: &str,
    snapshot: &OrderingSnapshot,
    mut classification: Classification,
) -> Classification {
    let Some(step) = snapshot.entity_collection_step else {
        return classification;
    };
    if step != EntityStep::Quantity {
        return classification;
    }
    let Some(quantity) = parse_quantity(user_message) else {
        return classification;
    };

    let already_correct = classification.sub_intent == SubIntent::ManageCart
        && classification.entities.get("quantity").is_some();
    if !already_correct {
        tracing::debug!(
            quantity,
            sub_intent = classification.sub_intent.as_str(),
            "overriding classification: quantity collection is active"
        );
    }
    classification.sub_intent = SubIntent::ManageCart;
    classification.confidence = classification.confidence.max(0.9);
    classification
        .entities
        .insert("action".to_string(), Value::from("add"));
    classification
        .entities
        .insert("quantity".to_string(), Value::from(quantity));
    classification
        .missing_entities
        .retain(|entity| entity != "quantity");
    classification
}

fn parse_quantity(message: &str) -> Option<u32> {
    let mut digits = String::new();
    for ch in message.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else if !digits.is_empty() {
            break;
        }
    }
    if let Ok(number) = digits.parse::<u32>() {
        if (1..=10).contains(&number) {
            return Some(number);
        }
        return None;
    }
    let lower = message.to_lowercase();
    [
        ("one", 1),
        ("two", 2),
        ("three", 3),
        ("four", 4),
        ("five", 5),
        ("six", 6),
        ("seven", 7),
        ("eight", 8),
        ("nine", 9),
        ("ten", 10),
    ]
    .iter()
    .find(|(word, _)| lower.contains(word))
    .map(|(_, number)| *number)
}

fn build_context(snapshot: &OrderingSnapshot) -> String {
    let mut lines = Vec::new();

    if let Some(step) = snapshot.entity_collection_step {
        lines.push(format!("COLLECTING ENTITY: {}", step.as_str()));
        lines.push("The user is answering our question about this entity. Keep the current flow; do not start a new intent.".to_string());
        if !snapshot.pending_entities.is_empty() {
            let pending = snapshot
                .pending_entities
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("Already collected: {pending}"));
        }
    }

    if snapshot.cart_items.is_empty() {
        lines.push("Cart is EMPTY".to_string());
    } else {
        lines.push(format!(
            "Cart has {} items: {}",
            snapshot.cart_items.len(),
            snapshot.cart_items.join(", ")
        ));
        if snapshot.cart_validated {
            lines.push("Cart validated - ready for checkout".to_string());
        }
    }

    if snapshot.has_draft_order {
        lines.push(
            "A draft order exists; 'change order' means cart operations".to_string(),
        );
    }
    lines.push(if snapshot.authenticated {
        "User is authenticated".to_string()
    } else {
        "User NOT authenticated".to_string()
    });
    if let Some(order_type) = &snapshot.order_type {
        lines.push(format!("Order type: {order_type}"));
    }

    lines.join("\n")
}
