//! Ollama Backend Implementation
//!
//! LLM backend for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions with message history
//! - `/api/tags` - List available models (used as the health probe)
//!
//! Streaming responses are newline-delimited JSON; each line carries
//! `message.content` and the last one sets `done: true`.

use std::time::Duration;

use async_trait::async_trait;

use super::lines::{ensure_success, fragment_stream, Frame};
use super::traits::{ChatRequest, FragmentStream, LlmBackend};
use crate::models::ChatProvider;

/// Default Ollama port
pub const DEFAULT_OLLAMA_PORT: u16 = 11434;

/// Ollama backend client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            http_client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Create from `OLLAMA_HOST` / `OLLAMA_PORT`
    #[must_use]
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_OLLAMA_PORT);
        Self::new(host, port)
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
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
        let mut options = serde_json::json!({ "temperature": params.temperature });
        if let Some(top_p) = params.top_p {
            options["top_p"] = serde_json::json!(top_p);
        }
        if let Some(top_k) = params.top_k {
            options["top_k"] = serde_json::json!(top_k);
        }
        if params.max_tokens > 0 {
            options["num_predict"] = serde_json::json!(params.max_tokens);
        }

        serde_json::json!({
            "model": request.model,
            "messages": messages,
            "stream": true,
            "options": options,
        })
    }

    fn parse_line(line: &str) -> Frame {
        let line = line.trim();
        if line.is_empty() {
            return Frame::Skip;
        }
        let Ok(data) = serde_json::from_str::<serde_json::Value>(line) else {
            return Frame::Skip;
        };
        if let Some(error) = data.get("error").and_then(|e| e.as_str()) {
            return Frame::Error(error.to_string());
        }
        match data["message"]["content"].as_str() {
            Some(content) if !content.is_empty() => Frame::Fragment(content.to_string()),
            _ if data["done"].as_bool().unwrap_or(false) => Frame::Done,
            _ => Frame::Skip,
        }
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_OLLAMA_PORT)
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &str {
        "Ollama"
    }

    fn provider(&self) -> ChatProvider {
        ChatProvider::Ollama
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn stream_chat(&self, request: &ChatRequest) -> anyhow::Result<FragmentStream> {
        let response = self
            .http_client
            .post(self.chat_url())
            .json(&Self::build_body(request))
            .send()
            .await?;
        let response = ensure_success(response, self.name()).await?;
        Ok(fragment_stream(response, Self::parse_line))
    }
}
