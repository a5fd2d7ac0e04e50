//! Anthropic Messages API client
//!
//! Implementation of `ModelClient` for `POST /v1/messages`.
//!
//! - `x-api-key` header authentication
//! - `anthropic-version` header
//! - 429 responses become rate-limit errors carrying the `retry-after` hint

use std::time::Duration;

use async_trait::async_trait;
use eval_core::{ContentBlock, EvalError, ModelClient, ModelRequest, ModelResponse, Result, StopReason};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic client configuration
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    pub api_key: String,

    /// API root, without the `/v1/messages` path
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            timeout_secs: 300,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub const fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Response body of a successful call
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<StopReason>,
}

/// Error body, e.g. `{"type":"error","error":{"type":"rate_limit_error","message":"…"}}`
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type", default)]
    kind: String,
    message: String,
}

/// Anthropic model client
pub struct AnthropicClient {
    http: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EvalError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }
}

/// Parse a `retry-after` header given in (possibly fractional) seconds
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let secs: f64 = value.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Human-readable message from an error body, falling back to the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body).map_or_else(
        |_| body.to_string(),
        |parsed| {
            if parsed.error.kind.is_empty() {
                parsed.error.message
            } else {
                format!("{}: {}", parsed.error.kind, parsed.error.message)
            }
        },
    )
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn create_message(&self, request: &ModelRequest<'_>) -> Result<ModelResponse> {
        tracing::debug!(model = request.model, messages = request.messages.len(), "Sending messages request");

        let response = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| EvalError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(EvalError::rate_limited(error_message(&body), retry_after));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(EvalError::Auth(error_message(&body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body, "Anthropic API error");
            return Err(EvalError::Provider {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| EvalError::ProviderUnavailable(format!("Failed to parse Anthropic response: {e}")))?;

        Ok(ModelResponse::new(
            body.content,
            body.stop_reason.unwrap_or_else(|| StopReason::Other("none".into())),
        ))
    }
}
