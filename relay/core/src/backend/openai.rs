//! OpenAI Backend Implementation
//!
//! Streams `POST {base}/chat/completions` with `stream: true`. The body is
//! server-sent events; each `data:` line carries a JSON chunk whose
//! `choices[0].delta.content` is the next fragment, and `data: [DONE]` ends
//! the stream. Any OpenAI-compatible server works with a custom base URL.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::lines::{ensure_success, fragment_stream, sse_data, Frame};
use super::traits::{ChatRequest, FragmentStream, LlmBackend};
use crate::models::ChatProvider;

/// Default API root
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat completions client
#[derive(Clone)]
pub struct OpenAiBackend {
    api_key: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    /// Create a backend against the public API
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
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

    /// Create from `OPENAI_API_KEY`, if set and non-empty
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var("OPENAI_API_KEY")
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
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.extend(
            request
                .messages
                .iter()
                .map(|m| serde_json::json!({"role": m.role, "content": m.content})),
        );

        let params = &request.params;
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "stream": true,
            "temperature": params.temperature,
        });
        if let Some(top_p) = params.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if params.max_tokens > 0 {
            body["max_completion_tokens"] = serde_json::json!(params.max_tokens);
        }
        body
    }

    fn parse_line(line: &str) -> Frame {
        let Some(data) = sse_data(line) else {
            return Frame::Skip;
        };
        if data == "[DONE]" {
            return Frame::Done;
        }
        let Ok(chunk) = serde_json::from_str::<serde_json::Value>(data) else {
            return Frame::Skip;
        };
        if let Some(message) = chunk["error"]["message"].as_str() {
            return Frame::Error(message.to_string());
        }
        match chunk["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => Frame::Fragment(content.to_string()),
            _ => Frame::Skip,
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "OpenAI"
    }

    fn provider(&self) -> ChatProvider {
        ChatProvider::OpenAi
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.url("models"))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn stream_chat(&self, request: &ChatRequest) -> anyhow::Result<FragmentStream> {
        let response = self
            .http_client
            .post(self.url("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&Self::build_body(request))
            .send()
            .await?;
        let response = ensure_success(response, self.name()).await?;
        Ok(fragment_stream(response, Self::parse_line))
    }
}
