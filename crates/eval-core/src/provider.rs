//! Model Gateway
//!
//! Defines the interface to the model endpoint ([`ModelClient`]) and the
//! [`ModelGateway`] that wraps a client with a bounded, per-call retry policy.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use eval_core::provider::{ModelConfig, ModelGateway, RetryPolicy};
//!
//! let gateway = ModelGateway::new(Arc::new(client), RetryPolicy::default());
//! let response = gateway.call(&conversation, &tools, &ModelConfig::default()).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{ContentBlock, Conversation, Message};
use crate::tool::ToolDescriptor;

/// Model configuration, constant for a run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier (e.g., "claude-3-7-sonnet-20250219")
    pub model: String,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for sampling; endpoint default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-20250219";

const fn default_max_tokens() -> u32 {
    1000
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            max_tokens: default_max_tokens(),
            temperature: None,
        }
    }
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Request body for one model call
#[derive(Clone, Debug, Serialize)]
pub struct ModelRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub tools: &'a [ToolDescriptor],
}

impl<'a> ModelRequest<'a> {
    pub fn new(config: &'a ModelConfig, messages: &'a [Message], tools: &'a [ToolDescriptor]) -> Self {
        Self {
            model: &config.model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            messages,
            tools,
        }
    }
}

/// Reason generation stopped
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StopReason {
    /// The model wants tools invoked
    ToolUse,
    EndTurn,
    MaxTokens,
    StopSequence,
    /// Any reason this crate does not name; treated as a stop
    Other(String),
}

impl StopReason {
    pub const fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ToolUse => "tool_use",
            Self::EndTurn => "end_turn",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
            Self::Other(reason) => reason,
        }
    }
}

impl From<String> for StopReason {
    fn from(reason: String) -> Self {
        match reason.as_str() {
            "tool_use" => Self::ToolUse,
            "end_turn" => Self::EndTurn,
            "max_tokens" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            _ => Self::Other(reason),
        }
    }
}

impl From<StopReason> for String {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Other(reason) => reason,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response from one model call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
}

impl ModelResponse {
    pub const fn new(content: Vec<ContentBlock>, stop_reason: StopReason) -> Self {
        Self { content, stop_reason }
    }
}

/// Strategy trait for model endpoints.
///
/// A client performs exactly one request per call; retrying is the
/// gateway's job. Rate limiting must be reported as
/// [`EvalError::RateLimited`](crate::EvalError::RateLimited).
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Client name, for logs
    fn name(&self) -> &str;

    /// Send one request
    async fn create_message(&self, request: &ModelRequest<'_>) -> Result<ModelResponse>;
}

/// Computes the wait before the next attempt from the failed attempt number
/// (1-based) and the server's hint
pub type BackoffFn = Arc<dyn Fn(u32, Option<Duration>) -> Duration + Send + Sync>;

/// Retry budget and backoff for one gateway call
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    backoff: BackoffFn,
}

/// Wait used when a rate-limit response carries no retry-after hint
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(1);

impl Default for RetryPolicy {
    /// Three attempts, honoring the server's wait hint
    fn default() -> Self {
        Self::new(3, |_, hint| hint.unwrap_or(DEFAULT_RETRY_WAIT))
    }
}

impl RetryPolicy {
    pub fn new<F>(max_attempts: u32, backoff: F) -> Self
    where
        F: Fn(u32, Option<Duration>) -> Duration + Send + Sync + 'static,
    {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Arc::new(backoff),
        }
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self::new(1, |_, _| Duration::ZERO)
    }

    /// Wait before the attempt following `attempt`
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        (self.backoff)(attempt, hint)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Calls the model with the full history and tool catalog, retrying rate limits
pub struct ModelGateway {
    client: Arc<dyn ModelClient>,
    policy: RetryPolicy,
}

impl ModelGateway {
    pub fn new(client: Arc<dyn ModelClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Gateway with the default three-attempt policy
    pub fn with_defaults(client: Arc<dyn ModelClient>) -> Self {
        Self::new(client, RetryPolicy::default())
    }

    /// Call the model once, retrying only on rate limiting.
    ///
    /// The retry counter lives in this call; a later call starts with a full budget.
    pub async fn call(
        &self,
        history: &Conversation,
        tools: &[ToolDescriptor],
        config: &ModelConfig,
    ) -> Result<ModelResponse> {
        let request = ModelRequest::new(config, history.messages(), tools);
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 1;

        loop {
            tracing::info!(
                client = self.client.name(),
                model = %config.model,
                messages = history.len(),
                attempt,
                "Calling model"
            );

            match self.client.create_message(&request).await {
                Ok(response) => {
                    tracing::debug!(
                        stop_reason = %response.stop_reason,
                        blocks = response.content.len(),
                        "Model responded"
                    );
                    return Ok(response);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let wait = self.policy.delay_for(attempt, err.retry_after());
                    tracing::warn!(
                        error = %err,
                        remaining = max_attempts - attempt,
                        wait_secs = wait.as_secs_f64(),
                        "Rate limit exceeded, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(error = %err, attempt, "Model call failed");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use crate::mock::ScriptedModelClient;
    use serde_json::json;

    fn end_turn(text: &str) -> ModelResponse {
        ModelResponse::new(vec![ContentBlock::text(text)], StopReason::EndTurn)
    }

    #[test]
    fn model_config_defaults() {
        let config = ModelConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, 1000);
        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            json!({"model": DEFAULT_MODEL, "max_tokens": 1000})
        );
    }

    #[test]
    fn stop_reason_parsing() {
        assert_eq!(StopReason::from("tool_use".to_string()), StopReason::ToolUse);
        assert_eq!(StopReason::from("end_turn".to_string()), StopReason::EndTurn);
        let other: StopReason = serde_json::from_value(json!("refusal")).unwrap();
        assert_eq!(other, StopReason::Other("refusal".into()));
        assert!(!other.is_tool_use());
        assert_eq!(serde_json::to_value(&other).unwrap(), json!("refusal"));
    }

    #[test]
    fn request_body_shape() {
        let config = ModelConfig::default();
        let conv = Conversation::new("hello");
        let tools = vec![ToolDescriptor::new("users", "List users", json!({"type": "object"}))];
        let body = serde_json::to_value(ModelRequest::new(&config, conv.messages(), &tools)).unwrap();

        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert!(body.get("temperature").is_none());

        let body = serde_json::to_value(ModelRequest::new(&config, conv.messages(), &[])).unwrap();
        assert!(body.get("tools").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limits_with_server_hints() {
        let client = Arc::new(ScriptedModelClient::new(vec![
            Err(EvalError::rate_limited("429", Some(Duration::from_secs(1)))),
            Err(EvalError::rate_limited("429", Some(Duration::from_secs(2)))),
            Ok(end_turn("done")),
        ]));
        let gateway = ModelGateway::with_defaults(client.clone());

        let started = tokio::time::Instant::now();
        let response = gateway
            .call(&Conversation::new("q"), &[], &ModelConfig::default())
            .await
            .unwrap();

        assert_eq!(response.content, vec![ContentBlock::text("done")]);
        assert_eq!(client.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_on_final_attempt_is_terminal() {
        let client = Arc::new(ScriptedModelClient::new(vec![
            Err(EvalError::rate_limited("429", Some(Duration::from_secs(1)))),
            Err(EvalError::rate_limited("429", Some(Duration::from_secs(1)))),
            Err(EvalError::rate_limited("429", Some(Duration::from_secs(1)))),
            Ok(end_turn("never reached")),
        ]));
        let gateway = ModelGateway::with_defaults(client.clone());

        let err = gateway
            .call(&Conversation::new("q"), &[], &ModelConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EvalError::RateLimited { .. }));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let client = Arc::new(ScriptedModelClient::new(vec![
            Err(EvalError::Provider { status: 500, message: "overloaded".into() }),
            Ok(end_turn("never reached")),
        ]));
        let gateway = ModelGateway::with_defaults(client.clone());

        let err = gateway
            .call(&Conversation::new("q"), &[], &ModelConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EvalError::Provider { status: 500, .. }));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_per_call() {
        let client = Arc::new(ScriptedModelClient::new(vec![
            Err(EvalError::rate_limited("429", None)),
            Err(EvalError::rate_limited("429", None)),
            Ok(end_turn("first")),
            Err(EvalError::rate_limited("429", None)),
            Err(EvalError::rate_limited("429", None)),
            Ok(end_turn("second")),
        ]));
        let gateway = ModelGateway::with_defaults(client.clone());
        let conv = Conversation::new("q");
        let config = ModelConfig::default();

        assert!(gateway.call(&conv, &[], &config).await.is_ok());
        assert!(gateway.call(&conv, &[], &config).await.is_ok());
        assert_eq!(client.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_backoff_receives_attempt_and_hint() {
        let client = Arc::new(ScriptedModelClient::new(vec![
            Err(EvalError::rate_limited("429", Some(Duration::from_secs(7)))),
            Ok(end_turn("ok")),
        ]));
        let policy = RetryPolicy::new(2, |attempt, hint| {
            assert_eq!(attempt, 1);
            assert_eq!(hint, Some(Duration::from_secs(7)));
            Duration::from_millis(10)
        });
        let gateway = ModelGateway::new(client.clone(), policy);

        let started = tokio::time::Instant::now();
        gateway
            .call(&Conversation::new("q"), &[], &ModelConfig::default())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(7));
        assert_eq!(client.calls(), 2);
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, |_, _| Duration::ZERO).max_attempts, 1);
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }
}
