//! Vision model client for reading construction plans.
//!
//! Talks to the Anthropic Messages API. Transient failures (connection
//! errors, rate limits, overloaded responses) are retried with exponential
//! backoff; anything else fails the call immediately.

use anyhow::{Context, Result};
use backoff::{backoff::Backoff, ExponentialBackoffBuilder};
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::config::Settings;
use crate::error::ApiError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic returns this when the service is overloaded
const STATUS_OVERLOADED: u16 = 529;

/// Longest single pause between attempts, whatever `Retry-After` asks for
const MAX_RETRY_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Vision model is not configured")]
    NotConfigured,

    #[error("Vision model request failed: {0}")]
    Transport(String),

    #[error("Vision model rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Vision model returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid vision model response: {0}")]
    InvalidResponse(String),
}

impl AiError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited { .. } => true,
            Self::Upstream { status, .. } => *status >= 500,
            Self::NotConfigured | Self::InvalidResponse(_) => false,
        }
    }
}

/// Pause before the next attempt: the server's `Retry-After` when given,
/// otherwise the backoff policy, never longer than [`MAX_RETRY_WAIT`].
fn retry_wait(err: &AiError, policy: &mut impl Backoff) -> Duration {
    let wait = match err {
        AiError::RateLimited {
            retry_after: Some(after),
        } => *after,
        _ => policy.next_backoff().unwrap_or(MAX_RETRY_WAIT),
    };
    wait.min(MAX_RETRY_WAIT)
}

impl From<AiError> for ApiError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::NotConfigured => ApiError::unavailable("AI parsing is not configured"),
            AiError::RateLimited { .. } => {
                ApiError::unavailable("AI service is busy, try again shortly")
            }
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Text { text: &'a str },
    Image { source: ImageSource<'a> },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'static str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// ============================================================================
// Client
// ============================================================================

/// Client for the vision model.
#[derive(Clone)]
pub struct AiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    max_retries: u32,
}

impl AiClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.ai_timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        if settings.anthropic_api_key.is_some() {
            tracing::info!(model = %settings.anthropic_model, "Vision client initialized");
        } else {
            tracing::warn!("ANTHROPIC_API_KEY not set, plan parsing will use text extraction");
        }

        Ok(Self {
            client,
            base_url: settings.anthropic_api_url.trim_end_matches('/').to_string(),
            api_key: settings.anthropic_api_key.clone(),
            model: settings.anthropic_model.clone(),
            max_tokens: settings.ai_max_tokens,
            max_retries: settings.ai_max_retries,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check the API key against the models endpoint.
    pub async fn health_check(&self) -> Result<()> {
        let api_key = self.api_key.as_deref().context("Vision model not configured")?;

        self.client
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("Vision model health check failed")?
            .error_for_status()
            .context("Vision model unhealthy")?;

        Ok(())
    }

    /// Send a prompt with page images and return the model's text answer.
    #[instrument(skip(self, prompt, page_images), fields(pages = page_images.len()))]
    pub async fn analyze_images(
        &self,
        prompt: &str,
        page_images: &[String],
    ) -> Result<String, AiError> {
        let api_key = self.api_key.as_deref().ok_or(AiError::NotConfigured)?;

        let mut content = vec![ContentBlock::Text { text: prompt }];
        content.extend(page_images.iter().map(|data| ContentBlock::Image {
            source: ImageSource {
                kind: "base64",
                media_type: "image/png",
                data,
            },
        }));

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content,
            }],
        };

        let mut policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(MAX_RETRY_WAIT)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send(api_key, &request).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() && attempt <= self.max_retries => {
                    let wait = retry_wait(&err, &mut policy);
                    warn!(attempt, error = %err, wait_ms = wait.as_millis() as u64, "Retrying vision request");
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    error!(attempt, error = %err, "Vision request failed");
                    return Err(err);
                }
            }
        }
    }

    async fn send(&self, api_key: &str, request: &MessagesRequest<'_>) -> Result<String, AiError> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(url = %url, model = %self.model, "Vision model request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(AiError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .map(|e| e.error.message)
                .unwrap_or_else(|_| status.to_string());
            let status = status.as_u16();
            if status == STATUS_OVERLOADED {
                warn!("Vision model overloaded");
            }
            return Err(AiError::Upstream { status, message });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;

        if let Some(usage) = &body.usage {
            debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                stop_reason = body.stop_reason.as_deref().unwrap_or("unknown"),
                "Vision model usage"
            );
        }

        extract_text(body)
    }
}

fn extract_text(body: MessagesResponse) -> Result<String, AiError> {
    let text: String = body
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("\n");

    if text.trim().is_empty() {
        return Err(AiError::InvalidResponse("response contained no text".to_string()));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_messages_shape() {
        let images = vec!["aGVsbG8=".to_string()];
        let request = MessagesRequest {
            model: "claude-test",
            max_tokens: 100,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentBlock::Text { text: "read this" },
                    ContentBlock::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: "image/png",
                            data: &images[0],
                        },
                    },
                ],
            }],
        };

        let value = serde_json::to_value(&request).unwrap();
        let content = &value["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "read this");
        assert_eq!(content[1]["type"], "image");
        assert_eq!(content[1]["source"]["type"], "base64");
        assert_eq!(content[1]["source"]["media_type"], "image/png");
    }

    #[test]
    fn joins_text_blocks() {
        let body: MessagesResponse = serde_json::from_value(serde_json::json!({
            "content": [
                { "type": "text", "text": "{\"bid_items\": []" },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "}" }
            ],
            "stop_reason": "end_turn"
        }))
        .unwrap();
        assert_eq!(extract_text(body).unwrap(), "{\"bid_items\": []\n}");
    }

    #[test]
    fn empty_response_is_invalid() {
        let body: MessagesResponse =
            serde_json::from_value(serde_json::json!({ "content": [] })).unwrap();
        assert!(matches!(extract_text(body), Err(AiError::InvalidResponse(_))));
    }

    #[test]
    fn transient_classification() {
        assert!(AiError::Transport("reset".into()).is_transient());
        assert!(AiError::RateLimited { retry_after: None }.is_transient());
        assert!(AiError::Upstream {
            status: 529,
            message: "overloaded".into()
        }
        .is_transient());
        assert!(!AiError::Upstream {
            status: 400,
            message: "bad image".into()
        }
        .is_transient());
        assert!(!AiError::NotConfigured.is_transient());
    }

    #[test]
    fn retry_after_is_capped() {
        let mut policy = backoff::backoff::Constant::new(Duration::from_millis(500));

        let asked_for_a_day = AiError::RateLimited {
            retry_after: Some(Duration::from_secs(86_400)),
        };
        assert_eq!(retry_wait(&asked_for_a_day, &mut policy), MAX_RETRY_WAIT);

        let short = AiError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(retry_wait(&short, &mut policy), Duration::from_secs(2));

        let reset = AiError::Transport("reset".into());
        assert_eq!(retry_wait(&reset, &mut policy), Duration::from_millis(500));
    }
}
