//! Relay Core - Per-Channel Message Broker for Streamed Generations
//!
//! This crate relays streamed tokens from a generative text provider into a
//! per-channel message log that web clients consume via long-polling. It has
//! no dependency on any HTTP server; the daemon crate is a thin transport on
//! top of it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  fragments  ┌──────────────┐  batches  ┌─────────────────────────┐
//! │   Provider   │ ──────────► │ StreamBatcher│ ────────► │         Broker          │
//! │  (LlmBackend)│  (bounded   │ (count / time│ (publish) │ ┌─────────┐ ┌─────────┐ │
//! └──────────────┘   queue)    │   trigger)   │           │ │ChannelLog│ │ Waiters │ │
//!        ▲                     └──────────────┘           │ └─────────┘ └─────────┘ │
//!        │ history                                        └────────────┬────────────┘
//!        └─────────────────────────────────────────────────────────────┤
//!                                                   subscribe / snapshot│
//!                                                                       ▼
//!                                                              long-poll clients
//! ```
//!
//! # Key Types
//!
//! - [`Broker`]: append log + waiter registry behind one lock
//! - [`Message`]: one unit of channel activity, with its fixed wire form
//! - [`StreamBatcher`]: coalesces a fragment stream into publishable batches
//! - [`Relay`]: pairs a provider producer with a batching consumer per request
//! - [`LlmBackend`]: provider adapter trait (OpenAI, Anthropic, Ollama)
//!
//! # Module Overview
//!
//! - [`backend`]: provider adapters producing lazy fragment streams
//! - [`broker`]: channel logs, waiter registry and the broker itself
//! - [`clock`]: injectable time source
//! - [`config`]: TOML + environment configuration
//! - [`messages`]: message model and serialization
//! - [`models`]: model name to provider registry
//! - [`params`]: generation parameter and identifier validation
//! - [`streaming`]: batcher and producer/consumer relay

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod broker;
pub mod clock;
pub mod config;
pub mod messages;
pub mod models;
pub mod params;
pub mod streaming;

pub use backend::{
    AnthropicBackend, ChatMessage, ChatRequest, FragmentStream, LlmBackend, OllamaBackend,
    OpenAiBackend,
};
pub use broker::{
    Broker, BrokerStats, ChannelLog, Delivery, Envelope, RetentionPolicy, Subscription,
    WaiterId, WaiterRegistry,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use messages::{Message, MessageRole};
pub use models::{ChatProvider, ModelRegistry, ModelSpec};
pub use params::{GenerationParams, ParamError, RawParams};
pub use streaming::{
    AskError, Batch, BatchConfig, GenerationHandle, GenerationId, GenerationSummary, Relay,
    RelaySettings, StreamBatcher, StreamEnd,
};

pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env, ConfigError,
    ConfigOverrides, ConfigSource, RelayConfig, RelayToml,
};
