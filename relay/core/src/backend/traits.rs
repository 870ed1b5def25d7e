//! LLM Backend Traits
//!
//! A backend turns a conversation into a lazy stream of text fragments. The
//! relay never sees provider wire formats; it only pulls fragments.
//!
//! # Design Philosophy
//!
//! - `stream_chat` sends the request and checks the status eagerly, so a
//!   refused request surfaces as an error before anything is published.
//! - The body is read lazily: bytes are pulled from the socket only when the
//!   caller polls the stream, so a slow consumer throttles the network read.
//! - Any error mid-stream ends the stream.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;

use crate::messages::{Message, MessageRole};
use crate::models::ChatProvider;
use crate::params::GenerationParams;

/// Lazy sequence of text fragments from a provider
pub type FragmentStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// One conversation turn sent to a provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// `"user"` or `"assistant"`
    pub role: &'static str,
    /// Turn text
    pub content: String,
}

impl ChatMessage {
    /// A user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    /// An assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }

    /// Convert a stored channel message; `None` for anything that is not a
    /// user or assistant turn with content
    #[must_use]
    pub fn from_message(message: &Message) -> Option<Self> {
        if !message.is_conversational() {
            return None;
        }
        match message.role {
            MessageRole::User => Some(Self::user(message.body.clone())),
            MessageRole::Assistant => Some(Self::assistant(message.body.clone())),
            MessageRole::System => None,
        }
    }
}

/// A streaming chat request
#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    /// Provider model identifier
    pub model: String,
    /// System prompt, sent the way each provider expects
    pub system: Option<String>,
    /// Conversation, oldest first
    pub messages: Vec<ChatMessage>,
    /// Sampling parameters
    pub params: GenerationParams,
}

impl ChatRequest {
    /// Create an empty request for `model`
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages: Vec::new(),
            params: GenerationParams::defaults(0),
        }
    }

    /// Set the system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Append conversational entries from channel history
    #[must_use]
    pub fn with_history(mut self, history: &[Message]) -> Self {
        self.messages
            .extend(history.iter().filter_map(ChatMessage::from_message));
        self
    }

    /// Append one turn
    #[must_use]
    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Set sampling parameters
    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// LLM Backend trait
///
/// Implement this trait to add support for a provider.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Backend name for logs (e.g., "Ollama", "OpenAI")
    fn name(&self) -> &str;

    /// The provider whose models this backend serves
    fn provider(&self) -> ChatProvider;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Send `request` and return its fragment stream
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be sent or the provider refuses it.
    async fn stream_chat(&self, request: &ChatRequest) -> anyhow::Result<FragmentStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_builder() {
        let history = vec![
            Message::user("c", "Hello"),
            Message::assistant("c", "Hi there"),
            Message::end_of_stream("c"),
            Message::new("c", "ignored", MessageRole::System),
        ];
        let request = ChatRequest::new("llama3")
            .with_system("Be brief")
            .with_history(&history)
            .with_message(ChatMessage::user("Again"))
            .with_params(GenerationParams::defaults(256));

        assert_eq!(request.model, "llama3");
        assert_eq!(request.system.as_deref(), Some("Be brief"));
        assert_eq!(
            request.messages,
            vec![
                ChatMessage::user("Hello"),
                ChatMessage::assistant("Hi there"),
                ChatMessage::user("Again"),
            ]
        );
        assert_eq!(request.params.max_tokens, 256);
    }

    #[test]
    fn test_chat_message_serializes_role_and_content() {
        let json = serde_json::to_value(ChatMessage::assistant("ok")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "ok"}));
    }
}
