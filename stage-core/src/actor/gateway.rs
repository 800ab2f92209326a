//! Resilient model calls for AI actors.
//!
//! A [`ChatBackend`] reports every call as a [`CallOutcome`]. The
//! [`ActorGateway`] retries rate-limited outcomes with exponential backoff,
//! honouring any wait the provider suggests, and gives up on fatal ones at
//! once. Whatever happens, [`ActorGateway::decide`] returns a decision: when
//! the budget runs out the actor simply passes.

use super::decision::ActorDecision;
use super::parser::DecisionParser;
use async_trait::async_trait;
use lazy_static::lazy_static;
use llm_client::{ChatClient, ChatMessage, ChatRequest};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

lazy_static! {
    static ref RETRY_IN: Regex = Regex::new(r"(?i)retry in\s*(\d+(?:\.\d+)?)\s*s").unwrap();
    static ref RETRY_AFTER: Regex =
        Regex::new(r"(?i)retry after\s*:?\s*(\d+(?:\.\d+)?)").unwrap();
}

/// Error text that marks a rate-limit or dropped-connection failure.
const RATE_LIMIT_SIGNALS: &[&str] = &[
    "429",
    "too many requests",
    "closed connection",
    "limitation",
    "quota",
    "resource_exhausted",
];

/// Longest provider-suggested wait honoured; larger hints are clamped.
const MAX_SUGGESTED_WAIT: Duration = Duration::from_secs(3600);

/// Error text that marks an exhausted quota.
const QUOTA_SIGNALS: &[&str] = &["429", "quota", "resource_exhausted"];

/// What a failed call tells us about when to try again.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryHint {
    /// Wait the provider asked for, if it named one.
    pub suggested_wait: Option<Duration>,
    pub quota_exhausted: bool,
    pub message: String,
}

impl RetryHint {
    /// Read a hint out of provider error text.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let suggested_wait = RETRY_IN
            .captures(&message)
            .or_else(|| RETRY_AFTER.captures(&message))
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(|secs| secs.min(MAX_SUGGESTED_WAIT.as_secs_f64()))
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

        Self {
            suggested_wait,
            quota_exhausted: QUOTA_SIGNALS.iter().any(|s| lower.contains(s)),
            message,
        }
    }
}

/// Result of a single backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Success(String),
    /// Transient: worth retrying after a wait.
    RateLimited(RetryHint),
    /// Retrying will not help.
    Fatal(String),
}

/// Whether error text looks like a rate limit or a dropped connection.
pub fn looks_rate_limited(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_SIGNALS.iter().any(|s| lower.contains(s))
}

/// Map a client error onto a call outcome.
pub fn classify_error(err: &llm_client::Error) -> CallOutcome {
    use llm_client::Error;

    let message = err.to_string();
    match err {
        Error::RateLimited { retry_after, .. } => {
            let mut hint = RetryHint::from_message(message);
            hint.quota_exhausted = true;
            if hint.suggested_wait.is_none() {
                hint.suggested_wait = *retry_after;
            }
            CallOutcome::RateLimited(hint)
        }
        // Dropped connections and garbled bodies from proxies are transient.
        Error::Network(_) | Error::Parse(_) => CallOutcome::RateLimited(RetryHint::from_message(message)),
        Error::Api { status, .. } if *status == 408 || *status >= 500 => {
            CallOutcome::RateLimited(RetryHint::from_message(message))
        }
        Error::Api { .. } if looks_rate_limited(&message) => {
            CallOutcome::RateLimited(RetryHint::from_message(message))
        }
        Error::Api { .. } | Error::NoApiKey | Error::Config(_) => CallOutcome::Fatal(message),
    }
}

/// Something that can answer a chat prompt.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn call(&self, messages: &[ChatMessage]) -> CallOutcome;

    /// Short label for logs (usually the model name).
    fn label(&self) -> &str;
}

/// [`ChatBackend`] over an HTTP [`ChatClient`].
#[derive(Debug, Clone)]
pub struct ClientBackend {
    client: ChatClient,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
}

impl ClientBackend {
    pub fn new(client: ChatClient) -> Self {
        Self {
            client,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
impl ChatBackend for ClientBackend {
    async fn call(&self, messages: &[ChatMessage]) -> CallOutcome {
        let mut request = ChatRequest::new(messages.to_vec());
        if let Some(t) = self.temperature {
            request = request.with_temperature(t);
        }
        if let Some(m) = self.max_tokens {
            request = request.with_max_tokens(m);
        }

        match self.client.complete(request).await {
            Ok(response) => CallOutcome::Success(response.content),
            Err(e) => classify_error(&e),
        }
    }

    fn label(&self) -> &str {
        self.client.model()
    }
}

/// Backoff configuration for the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles each time after.
    pub base_backoff: Duration,
    /// Upper bound of the uniform random jitter added to each wait.
    pub max_jitter: Duration,
    /// Added on top of a provider-suggested wait.
    pub suggestion_padding: Duration,
    /// Minimum wait once a quota looks exhausted.
    pub quota_floor: Duration,
    /// Seed for the jitter source. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_secs(2),
            max_jitter: Duration::from_secs(1),
            suggestion_padding: Duration::from_millis(1500),
            quota_floor: Duration::from_secs(10),
            seed: None,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    pub fn with_quota_floor(mut self, floor: Duration) -> Self {
        self.quota_floor = floor;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Pure exponential part of the wait after failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_backoff.saturating_mul(factor)
    }

    /// Full wait after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32, hint: &RetryHint, jitter: Duration) -> Duration {
        let exponential = self.backoff(attempt) + jitter;
        match hint.suggested_wait {
            Some(suggested) => exponential.max(suggested + self.suggestion_padding),
            None if hint.quota_exhausted => exponential.max(self.quota_floor),
            None => exponential,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("request rejected: {0}")]
    Fatal(String),

    #[error("cancelled")]
    Cancelled,
}

/// Retrying front door to a [`ChatBackend`].
pub struct ActorGateway {
    backend: Arc<dyn ChatBackend>,
    policy: RetryPolicy,
    parser: DecisionParser,
    rng: Mutex<StdRng>,
    cancel: Option<CancellationToken>,
}

impl ActorGateway {
    pub fn new(backend: Arc<dyn ChatBackend>, policy: RetryPolicy) -> Self {
        let rng = match policy.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            backend,
            policy,
            parser: DecisionParser::new(),
            rng: Mutex::new(rng),
            cancel: None,
        }
    }

    /// Abandon backoff waits once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    /// Sleep for `wait`. Returns false if cancelled first.
    async fn backoff(&self, wait: Duration) -> bool {
        match &self.cancel {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(wait) => true,
            },
            None => {
                tokio::time::sleep(wait).await;
                true
            }
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn label(&self) -> &str {
        self.backend.label()
    }

    fn jitter(&self) -> Duration {
        let max = self.policy.max_jitter.as_secs_f64();
        if max <= 0.0 {
            return Duration::ZERO;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        Duration::from_secs_f64(rng.gen_range(0.0..max))
    }

    /// Call the backend, retrying transient failures.
    pub async fn call(&self, messages: &[ChatMessage]) -> Result<String, GatewayError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last = String::new();

        for attempt in 0..attempts {
            if self.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            match self.backend.call(messages).await {
                CallOutcome::Success(text) => return Ok(text),
                CallOutcome::Fatal(reason) => {
                    warn!(backend = self.label(), %reason, "Model call rejected");
                    return Err(GatewayError::Fatal(reason));
                }
                CallOutcome::RateLimited(hint) => {
                    let is_last = attempt + 1 == attempts;
                    if !is_last {
                        let wait = self.policy.delay_for(attempt, &hint, self.jitter());
                        warn!(
                            backend = self.label(),
                            attempt = attempt + 1,
                            wait_ms = wait.as_millis() as u64,
                            "Rate limited, backing off"
                        );
                        if !self.backoff(wait).await {
                            debug!(backend = self.label(), "Stopped during backoff");
                            return Err(GatewayError::Cancelled);
                        }
                    }
                    last = hint.message;
                }
            }
        }

        Err(GatewayError::Exhausted { attempts, last })
    }

    /// Call the backend and parse the reply. Failures become a pass.
    pub async fn decide(&self, messages: &[ChatMessage]) -> ActorDecision {
        match self.call(messages).await {
            Ok(reply) => {
                let (decision, strategy) = self.parser.parse_with_strategy(&reply);
                debug!(backend = self.label(), ?strategy, "Parsed actor reply");
                decision
            }
            Err(e) => {
                warn!(backend = self.label(), error = %e, "Actor call failed, passing turn");
                ActorDecision::pass()
            }
        }
    }
}

impl std::fmt::Debug for ActorGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorGateway")
            .field("backend", &self.backend.label())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_parses_retry_in() {
        let hint = RetryHint::from_message("Error 429: quota hit, please retry in 5.2s.");
        assert_eq!(hint.suggested_wait, Some(Duration::from_secs_f64(5.2)));
        assert!(hint.quota_exhausted);
    }

    #[test]
    fn test_hint_parses_retry_after() {
        let hint = RetryHint::from_message("Too Many Requests. Retry after 3 seconds");
        assert_eq!(hint.suggested_wait, Some(Duration::from_secs(3)));
        assert!(!hint.quota_exhausted);
    }

    #[test]
    fn test_hint_oversized_wait_is_clamped() {
        let hint = RetryHint::from_message("429: retry in 99999999999999999999999s");
        assert_eq!(hint.suggested_wait, Some(MAX_SUGGESTED_WAIT));

        let hint = RetryHint::from_message(format!("retry after {}", "9".repeat(400)));
        assert_eq!(hint.suggested_wait, Some(MAX_SUGGESTED_WAIT));
    }

    #[test]
    fn test_delay_honours_suggestion() {
        let policy = RetryPolicy::default();
        let hint = RetryHint::from_message("retry in 5.2s");
        let wait = policy.delay_for(0, &hint, Duration::from_millis(300));
        assert_eq!(wait, Duration::from_secs_f64(5.2) + Duration::from_millis(1500));

        // Exponential wins once it is larger.
        let late = policy.delay_for(3, &hint, Duration::ZERO);
        assert_eq!(late, Duration::from_secs(16));
    }

    #[test]
    fn test_delay_quota_floor() {
        let policy = RetryPolicy::default();
        let hint = RetryHint::from_message("RESOURCE_EXHAUSTED");
        assert_eq!(policy.delay_for(0, &hint, Duration::ZERO), Duration::from_secs(10));
    }

    #[test]
    fn test_plain_backoff_is_exponential() {
        let policy = RetryPolicy::default();
        let hint = RetryHint::from_message("closed connection");
        assert_eq!(policy.delay_for(0, &hint, Duration::ZERO), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1, &hint, Duration::ZERO), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2, &hint, Duration::ZERO), Duration::from_secs(8));
    }

    #[test]
    fn test_classify_errors() {
        use llm_client::Error;

        let limited = classify_error(&Error::RateLimited {
            retry_after: Some(Duration::from_secs(4)),
            message: "slow down".into(),
        });
        match limited {
            CallOutcome::RateLimited(hint) => {
                assert_eq!(hint.suggested_wait, Some(Duration::from_secs(4)));
                assert!(hint.quota_exhausted);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }

        assert!(matches!(
            classify_error(&Error::Network("connection reset".into())),
            CallOutcome::RateLimited(_)
        ));
        assert!(matches!(
            classify_error(&Error::Api { status: 503, message: "overloaded".into() }),
            CallOutcome::RateLimited(_)
        ));
        assert!(matches!(
            classify_error(&Error::Api { status: 400, message: "bad request".into() }),
            CallOutcome::Fatal(_)
        ));
        assert!(matches!(
            classify_error(&Error::Api { status: 403, message: "quota exceeded for project".into() }),
            CallOutcome::RateLimited(_)
        ));
        assert!(matches!(classify_error(&Error::NoApiKey), CallOutcome::Fatal(_)));
    }

    #[test]
    fn test_looks_rate_limited() {
        assert!(looks_rate_limited("HTTP 429 Too Many Requests"));
        assert!(looks_rate_limited("Server closed connection"));
        assert!(!looks_rate_limited("invalid model name"));
    }
}
