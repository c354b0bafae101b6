use serde_json::Value;

use crate::state::{Classification, EntityStep, OrderingSnapshot, SubIntent};

const WORD_NUMBERS: [(&str, u32); 10] = [
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
];

const CHECKOUT_KEYWORDS: [&str; 3] = ["checkout", "place order", "ready to order"];
const ORDERING_PATTERNS: [&str; 7] = [
    "i want", "i need", "give me", "get me", "i'll have", "i'll take", "order",
];
const GENERIC_ORDER_PHRASES: [&str; 4] = [
    "i want to order food",
    "i want to order",
    "order food",
    "order something",
];
const CART_KEYWORDS: [&str; 6] = ["add", "remove", "delete", "update", "change", "cart"];
const BROWSE_KEYWORDS: [&str; 4] = ["menu", "categories", "show", "list"];
const DISCOVERY_KEYWORDS: [&str; 10] = [
    "vegetarian",
    "vegan",
    "search",
    "find",
    "spicy",
    "what is",
    "tell me",
    "show me",
    "available",
    "options",
];

/// First digit run in the message, if any.
fn first_number(message: &str) -> Option<u32> {
    let mut digits = String::new();
    for ch in message.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else if !digits.is_empty() {
            break;
        }
    }
    digits.parse().ok()
}

fn word_number(message_lower: &str) -> Option<u32> {
    WORD_NUMBERS
        .iter()
        .find(|(word, _)| message_lower.contains(word))
        .map(|(_, number)| *number)
}

fn quantity_reply(message: &str, message_lower: &str) -> Option<u32> {
    first_number(message)
        .filter(|number| (1..=10).contains(number))
        .or_else(|| word_number(message_lower))
}

/// Deterministic keyword classification, applied in fixed priority order when
/// the structured path times out, fails to parse, or violates the schema.
pub fn fallback_classification(message: &str, snapshot: &OrderingSnapshot) -> Classification {
    let message_lower = message.to_lowercase();

    // 1. An active quantity collection interprets the message as a quantity,
    //    never as a new intent.
    if snapshot.entity_collection_step == Some(EntityStep::Quantity) {
        if let Some(quantity) = quantity_reply(message, &message_lower) {
            return Classification::new(SubIntent::ManageCart, 0.9)
                .with_entity("action", Value::from("add"))
                .with_entity("quantity", Value::from(quantity))
                .with_reasoning("quantity reply during entity collection");
        }
    }

    // 2. Checkout keywords: validated carts proceed, everything else
    //    validates first.
    if CHECKOUT_KEYWORDS
        .iter()
        .any(|keyword| message_lower.contains(keyword))
    {
        return if snapshot.cart_validated {
            let classification = Classification::new(SubIntent::ExecuteCheckout, 0.7)
                .with_reasoning("checkout keywords with validated cart");
            if snapshot.order_type.is_none() {
                classification.with_missing(&["order_type"])
            } else {
                classification
            }
        } else {
            Classification::new(SubIntent::ValidateOrder, 0.7)
                .with_reasoning("first checkout mention, validating")
        };
    }

    // 3. Ordering verbs with a concrete object are cart adds.
    if ORDERING_PATTERNS
        .iter()
        .any(|pattern| message_lower.contains(pattern))
        && !GENERIC_ORDER_PHRASES
            .iter()
            .any(|phrase| message_lower.contains(phrase))
    {
        let classification = Classification::new(SubIntent::ManageCart, 0.7)
            .with_entity("action", Value::from("add"))
            .with_reasoning("ordering verb detected");
        return if message.split_whitespace().count() <= 3 {
            classification.with_missing(&["item_name"])
        } else {
            classification
        };
    }

    // 4. Cart management verbs.
    if CART_KEYWORDS
        .iter()
        .any(|keyword| message_lower.contains(keyword))
    {
        let action = if message_lower.contains("add") {
            "add"
        } else if message_lower.contains("remove") || message_lower.contains("delete") {
            "remove"
        } else if message_lower.contains("update") || message_lower.contains("change") {
            "update"
        } else {
            "view"
        };
        let classification = Classification::new(SubIntent::ManageCart, 0.6)
            .with_entity("action", Value::from(action))
            .with_reasoning("cart keywords detected");
        return if action == "add" {
            classification.with_missing(&["item_name"])
        } else {
            classification
        };
    }

    // 5. Browse keywords.
    if BROWSE_KEYWORDS
        .iter()
        .any(|keyword| message_lower.contains(keyword))
    {
        return Classification::new(SubIntent::BrowseMenu, 0.6)
            .with_reasoning("browse keywords detected");
    }

    // 6. Discovery signals.
    if DISCOVERY_KEYWORDS
        .iter()
        .any(|keyword| message_lower.contains(keyword))
    {
        return Classification::new(SubIntent::DiscoverItems, 0.6)
            .with_entity("search_query", Value::from(message))
            .with_reasoning("discovery keywords detected");
    }

    // 7. Short messages with no keywords read as item selections.
    let word_count = message.split_whitespace().count();
    if (1..=5).contains(&word_count) {
        let item_name = message_lower
            .split_whitespace()
            .filter(|word| !matches!(*word, "please" | "thanks" | "the"))
            .collect::<Vec<_>>()
            .join(" ");
        return Classification::new(SubIntent::ManageCart, 0.6)
            .with_entity("action", Value::from("add"))
            .with_entity("item_name", Value::from(item_name))
            .with_missing(&["quantity"])
            .with_reasoning("short message treated as item selection");
    }

    // 8. Nothing matched.
    Classification::new(SubIntent::BrowseMenu, 0.4).with_reasoning("no clear intent")
}
