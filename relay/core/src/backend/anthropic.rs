//! Anthropic Backend Implementation
//!
//! Streams `POST {base}/messages`. Server-sent events are typed by the JSON
//! `type` field:
//!
//! - `content_block_delta` with a `text_delta` carries the next fragment
//! - `message_stop` ends the stream
//! - `error` fails it
//!
//! Everything else (`message_start`, `ping`, block boundaries) is skipped.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::lines::{ensure_success, fragment_stream, sse_data, Frame};
use super::traits::{ChatRequest, FragmentStream, LlmBackend};
use crate::models::ChatProvider;

/// Default API root
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages client
#[derive(Clone)]
pub struct AnthropicBackend {
    api_key: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl AnthropicBackend {
    /// Create a backend against the public API
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            http_client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Point at a different API root
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Create from `ANTHROPIC_API_KEY`, if set and non-empty
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(Self::new)
    }

    /// The API root in use
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    fn build_body(request: &ChatRequest) -> serde_json::Value {
        let params = &request.params;
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "stream": true,
        });
        if let Some(system) = &request.system {
            body["system"] = serde_json::json!(system);
        }
        if let Some(top_p) = params.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(top_k) = params.top_k {
            body["top_k"] = serde_json::json!(top_k);
        }
        body
    }

    fn parse_line(line: &str) -> Frame {
        let Some(data) = sse_data(line) else {
            return Frame::Skip;
        };
        let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
            return Frame::Skip;
        };
        match event["type"].as_str().unwrap_or_default() {
            "content_block_delta" if event["delta"]["type"] == "text_delta" => {
                match event["delta"]["text"].as_str() {
                    Some(text) if !text.is_empty() => Frame::Fragment(text.to_string()),
                    _ => Frame::Skip,
                }
            }
            "message_stop" => Frame::Done,
            "error" => Frame::Error(
                event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
            ),
            _ => Frame::Skip,
        }
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "Anthropic"
    }

    fn provider(&self) -> ChatProvider {
        ChatProvider::Anthropic
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.url("models"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn stream_chat(&self, request: &ChatRequest) -> anyhow::Result<FragmentStream> {
        let response = self
            .http_client
            .post(self.url("messages"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Self::build_body(request))
            .send()
            .await?;
        let response = ensure_success(response, self.name()).await?;
        Ok(fragment_stream(response, Self::parse_line))
    }
}
