use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of food-ordering sub-intents. The classifier can never yield
/// anything outside this enum: the structured path deserializes into it and
/// the fallback only constructs these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubIntent {
    BrowseMenu,
    DiscoverItems,
    ManageCart,
    ValidateOrder,
    ExecuteCheckout,
}

impl SubIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubIntent::BrowseMenu => "browse_menu",
            SubIntent::DiscoverItems => "discover_items",
            SubIntent::ManageCart => "manage_cart",
            SubIntent::ValidateOrder => "validate_order",
            SubIntent::ExecuteCheckout => "execute_checkout",
        }
    }
}

/// Which entity the conversation is currently collecting. While one is
/// active the sub-intent is pinned and the user's message is read as a value
/// for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStep {
    Quantity,
    ItemName,
    OrderType,
}

impl EntityStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStep::Quantity => "quantity",
            EntityStep::ItemName => "item_name",
            EntityStep::OrderType => "order_type",
        }
    }
}

/// Compact conversation-state snapshot fed into classification.
#[derive(Debug, Clone, Default)]
pub struct OrderingSnapshot {
    pub cart_items: Vec<String>,
    pub cart_validated: bool,
    pub has_draft_order: bool,
    pub authenticated: bool,
    pub order_type: Option<String>,
    pub entity_collection_step: Option<EntityStep>,
    pub pending_entities: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub sub_intent: SubIntent,
    pub confidence: f64,
    #[serde(default)]
    pub entities: Map<String, Value>,
    #[serde(default)]
    pub missing_entities: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl Classification {
    pub fn new(sub_intent: SubIntent, confidence: f64) -> Self {
        Self {
            sub_intent,
            confidence,
            entities: Map::new(),
            missing_entities: Vec::new(),
            reasoning: String::new(),
        }
    }

    pub fn with_entity(mut self, key: &str, value: Value) -> Self {
        self.entities.insert(key.to_string(), value);
        self
    }

    pub fn with_missing(mut self, missing: &[&str]) -> Self {
        self.missing_entities = missing.iter().map(|entry| entry.to_string()).collect();
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// Function-calling schema for the structured classification call.
    pub fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "sub_intent": {
                    "type": "string",
                    "enum": [
                        "browse_menu",
                        "discover_items",
                        "manage_cart",
                        "validate_order",
                        "execute_checkout"
                    ]
                },
                "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                "entities": { "type": "object" },
                "missing_entities": { "type": "array", "items": { "type": "string" } },
                "reasoning": { "type": "string" }
            },
            "required": ["sub_intent", "confidence"]
        })
    }
}
