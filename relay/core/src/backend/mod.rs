//! LLM Backend Integration
//!
//! Provider adapters behind a common trait. Each one sends a streaming chat
//! request and hands back a lazy [`FragmentStream`].
//!
//! # Available Backends
//!
//! - **OpenAI**: chat completions over SSE (any compatible server)
//! - **Anthropic**: messages API over SSE
//! - **Ollama**: local server, NDJSON
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{ChatMessage, ChatRequest, LlmBackend, OllamaBackend};
//!
//! let backend = OllamaBackend::from_env();
//! let request = ChatRequest::new("llama3").with_message(ChatMessage::user("Hello!"));
//! let mut fragments = backend.stream_chat(&request).await?;
//! ```

mod anthropic;
mod lines;
mod ollama;
mod openai;
mod traits;

pub use anthropic::{AnthropicBackend, DEFAULT_ANTHROPIC_BASE_URL};
pub use lines::LineBuffer;
pub use ollama::{OllamaBackend, DEFAULT_OLLAMA_PORT};
pub use openai::{OpenAiBackend, DEFAULT_OPENAI_BASE_URL};
pub use traits::{ChatMessage, ChatRequest, FragmentStream, LlmBackend};
