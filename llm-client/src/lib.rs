//! Minimal OpenAI-compatible chat completions client.
//!
//! This crate provides a focused client for any provider that speaks the
//! `/chat/completions` protocol:
//! - Non-streaming completions
//! - Connection checks with latency measurement
//! - Model listing

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Errors that can occur when using the chat client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited (429): {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// HTTP status associated with the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::RateLimited { .. } => Some(429),
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Chat completions client bound to one endpoint and default model.
#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    /// Create a client for the given endpoint.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, Error> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::NoApiKey);
        }
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("base URL is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: model.into(),
        })
    }

    /// Create a client from `LLM_API_KEY`, `LLM_BASE_URL` and `LLM_MODEL`.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("LLM_API_KEY").map_err(|_| Error::NoApiKey)?;
        let base_url =
            std::env::var("LLM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(base_url, api_key, model)
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a completion request and return the full response.
    pub async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, Error> {
        let api_request = self.build_api_request(&request);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            if status == 429 {
                return Err(Error::RateLimited {
                    retry_after,
                    message: body,
                });
            }
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        parse_response(&body)
    }

    /// Send a tiny prompt and report whether the endpoint answers.
    pub async fn check_connection(&self) -> ConnectionReport {
        let request = ChatRequest::new(vec![ChatMessage::user("Hi")]).with_max_tokens(5);
        let start = Instant::now();
        match self.complete(request).await {
            Ok(response) => ConnectionReport {
                ok: true,
                latency: start.elapsed(),
                message: "Connection successful".to_string(),
                reply: Some(response.content),
            },
            Err(e) => ConnectionReport {
                ok: false,
                latency: Duration::ZERO,
                message: e.to_string(),
                reply: None,
            },
        }
    }

    /// List the model ids the provider exposes.
    pub async fn list_models(&self) -> Result<Vec<String>, Error> {
        let headers = self.build_headers()?;
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .headers(headers)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let list: ApiModelList = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }

    fn build_api_request(&self, request: &ChatRequest) -> ApiRequest {
        ApiRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: request
                .messages
                .iter()
                .map(|m| ApiMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json_mode.then(|| ApiResponseFormat {
                r#type: "json_object".to_string(),
            }),
        }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn parse_response(body: &str) -> Result<ChatResponse, Error> {
    let api_response: ApiResponse =
        serde_json::from_str(body).map_err(|e| Error::Parse(e.to_string()))?;

    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Parse("response has no choices".to_string()))?;

    Ok(ChatResponse {
        id: api_response.id.unwrap_or_default(),
        model: api_response.model.unwrap_or_default(),
        content: choice.message.content.unwrap_or_default(),
        finish_reason: choice.finish_reason,
        usage: api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }),
    })
}

// ============================================================================
// Public types
// ============================================================================

/// A completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            model: None,
            messages,
            max_tokens: None,
            temperature: None,
            json_mode: false,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A completed response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Outcome of [`ChatClient::check_connection`].
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub ok: bool,
    pub latency: Duration,
    pub message: String,
    pub reply: Option<String>,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ApiResponseFormat>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ApiResponseFormat {
    r#type: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ApiModelList {
    #[serde(default)]
    data: Vec<ApiModel>,
}

#[derive(Deserialize)]
struct ApiModel {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ChatClient::new("http://localhost:8000/v1/", "test-key", "local").unwrap();
        assert_eq!(client.model(), "local");
        assert_eq!(client.base_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn test_client_requires_key() {
        let err = ChatClient::new(DEFAULT_BASE_URL, "  ", DEFAULT_MODEL).unwrap_err();
        assert!(matches!(err, Error::NoApiKey));
    }

    #[test]
    fn test_client_with_model() {
        let client = ChatClient::new(DEFAULT_BASE_URL, "k", DEFAULT_MODEL)
            .unwrap()
            .with_model("qwen-plus");
        assert_eq!(client.model(), "qwen-plus");
    }

    #[test]
    fn test_request_builder() {
        let request = ChatRequest::new(vec![ChatMessage::system("Be brief"), ChatMessage::user("Hello")])
            .with_max_tokens(100)
            .with_temperature(0.7)
            .with_json_mode();

        assert_eq!(request.max_tokens, Some(100));
        assert_eq!(request.temperature, Some(0.7));
        assert!(request.json_mode);
        assert_eq!(request.messages[0].role, Role::System);
    }

    #[test]
    fn test_api_request_uses_default_model() {
        let client = ChatClient::new(DEFAULT_BASE_URL, "k", "m1").unwrap();
        let api = client.build_api_request(&ChatRequest::new(vec![ChatMessage::user("x")]));
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["model"], "m1");
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("response_format").is_none());
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "id": "chatcmpl-1",
            "model": "m1",
            "choices": [{"message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        }"#;
        let response = parse_response(body).unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.unwrap().prompt_tokens, 3);
    }

    #[test]
    fn test_parse_response_null_content() {
        let body = r#"{"choices": [{"message": {"content": null}}]}"#;
        let response = parse_response(body).unwrap();
        assert_eq!(response.content, "");
    }

    #[test]
    fn test_parse_response_without_choices() {
        let err = parse_response(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_error_status() {
        let err = Error::RateLimited {
            retry_after: None,
            message: "slow down".to_string(),
        };
        assert_eq!(err.status(), Some(429));
        assert_eq!(Error::Network("x".into()).status(), None);
    }
}
