use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The two budgeted model tiers. Every account carries an independent budget
/// per tier; the wire-level model name is resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Primary,
    Mini,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Primary => "primary",
            ModelTier::Mini => "mini",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

/// Provider failures. Rate limits are a distinct kind so the pool probe and
/// the scheduler can tell "slow down" apart from "broken account".
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rate limited: {0}")]
    RateLimited(String),
    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),
    #[error("provider error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("provider call timed out")]
    Timeout,
    #[error("failed to parse provider response: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Substrings that indicate an exhausted balance rather than a transient
    /// rate limit.
    pub fn looks_like_no_credits(&self) -> bool {
        let message = match self {
            ProviderError::RateLimited(message) => message,
            ProviderError::Api { message, .. } => message,
            _ => return false,
        };
        let lower = message.to_lowercase();
        ["quota", "billing", "insufficient_quota", "exceeded"]
            .iter()
            .any(|needle| lower.contains(needle))
    }
}

/// Chat-completion port. One implementation speaks the OpenAI-compatible wire
/// protocol; the scripted implementation below backs tests and local dev.
#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    async fn complete(
        &self,
        api_key: &str,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<ChatResponse, ProviderError>;

    /// Schema-constrained completion via function-calling. Returns the raw
    /// argument object; deserialization into a caller type happens above this
    /// port so schema violations surface as a distinct error there.
    async fn complete_structured(
        &self,
        api_key: &str,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
        schema_name: &str,
        schema: &Value,
    ) -> Result<Value, ProviderError>;
}

// ---------------- OpenAI-compatible implementation ----------------

#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolSpec<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Serialize)]
struct ToolSpec<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionSpec<'a>,
}

#[derive(Serialize)]
struct FunctionSpec<'a> {
    name: &'a str,
    parameters: &'a Value,
}

#[derive(Deserialize)]
struct CompletionResponse {
    model: Option<String>,
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: ToolCallFunction,
}

#[derive(Deserialize)]
struct ToolCallFunction {
    arguments: String,
}

impl OpenAiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn dispatch(
        &self,
        api_key: &str,
        request: &CompletionRequest<'_>,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RateLimited(body));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unauthorized(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json::<CompletionResponse>()
            .await
            .map_err(|err| ProviderError::Parse(err.to_string()))
    }
}

#[async_trait]
impl ChatCompletionClient for OpenAiClient {
    async fn complete(
        &self,
        api_key: &str,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<ChatResponse, ProviderError> {
        let request = CompletionRequest {
            model,
            messages,
            temperature,
            max_tokens,
            tools: None,
            tool_choice: None,
        };
        let body = self.dispatch(api_key, &request).await?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("response contained no choices".into()))?;
        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            model: body.model.unwrap_or_else(|| model.to_string()),
        })
    }

    async fn complete_structured(
        &self,
        api_key: &str,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
        schema_name: &str,
        schema: &Value,
    ) -> Result<Value, ProviderError> {
        let tools = vec![ToolSpec {
            kind: "function",
            function: FunctionSpec {
                name: schema_name,
                parameters: schema,
            },
        }];
        let request = CompletionRequest {
            model,
            messages,
            temperature,
            max_tokens: None,
            tools: Some(tools),
            tool_choice: Some(serde_json::json!({
                "type": "function",
                "function": { "name": schema_name }
            })),
        };
        let body = self.dispatch(api_key, &request).await?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("response contained no choices".into()))?;
        let call = choice
            .message
            .tool_calls
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("model did not call the schema function".into()))?;
        serde_json::from_str(&call.function.arguments)
            .map_err(|err| ProviderError::Parse(err.to_string()))
    }
}

// ---------------- Scripted implementation (tests, local dev) ----------------

/// Deterministic stand-in for the provider port. Responses are consumed in
/// FIFO order; an empty script answers with a canned success.
#[derive(Default)]
pub struct ScriptedChatClient {
    completions: std::sync::Mutex<std::collections::VecDeque<Result<ChatResponse, ProviderError>>>,
    structured: std::sync::Mutex<std::collections::VecDeque<Result<Value, ProviderError>>>,
    calls: std::sync::Mutex<Vec<RecordedCall>>,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub api_key: String,
    pub model: String,
    pub structured: bool,
}

impl ScriptedChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_completion(&self, result: Result<ChatResponse, ProviderError>) {
        self.completions.lock().unwrap().push_back(result);
    }

    pub fn push_structured(&self, result: Result<Value, ProviderError>) {
        self.structured.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, api_key: &str, model: &str, structured: bool) {
        self.calls.lock().unwrap().push(RecordedCall {
            api_key: api_key.to_string(),
            model: model.to_string(),
            structured,
        });
    }
}

#[async_trait]
impl ChatCompletionClient for ScriptedChatClient {
    async fn complete(
        &self,
        api_key: &str,
        model: &str,
        _messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: Option<u32>,
    ) -> Result<ChatResponse, ProviderError> {
        self.record(api_key, model, false);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(ChatResponse {
                    content: "ok".to_string(),
                    model: model.to_string(),
                })
            })
    }

    async fn complete_structured(
        &self,
        api_key: &str,
        model: &str,
        _messages: &[ChatMessage],
        _temperature: f32,
        _schema_name: &str,
        _schema: &Value,
    ) -> Result<Value, ProviderError> {
        self.record(api_key, model, true);
        self.structured
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Value::Object(serde_json::Map::new())))
    }
}
