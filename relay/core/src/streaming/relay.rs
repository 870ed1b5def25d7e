//! Relay - Provider to Broker Pairing
//!
//! Admits a user turn, then runs one producer/consumer pair per generation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::batcher::{Batch, BatchConfig, StreamBatcher};
use crate::backend::{ChatRequest, LlmBackend};
use crate::broker::Broker;
use crate::messages::Message;
use crate::models::{ChatProvider, ModelRegistry};
use crate::params::{self, GenerationParams, ParamError, RawParams};

// ============================================================================
// Settings
// ============================================================================

/// Per-generation tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelaySettings {
    /// Batch trigger thresholds
    pub batch: BatchConfig,
    /// Capacity of the producer/consumer queue
    pub queue_capacity: usize,
    /// How many stored entries feed the provider's conversation history
    pub history_limit: usize,
    /// Prepended to every conversation
    pub system_prompt: Option<String>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            queue_capacity: 16,
            history_limit: 50,
            system_prompt: None,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Why a user turn was not admitted
#[derive(Debug, Error)]
pub enum AskError {
    /// Channel, model name or generation parameters failed validation
    #[error(transparent)]
    InvalidParams(#[from] ParamError),

    /// The model is not in the registry
    #[error("unrecognized model: {0}")]
    UnknownModel(String),

    /// The model's provider has no configured backend
    #[error("model not supported: no {0} backend configured")]
    ProviderUnavailable(ChatProvider),
}

// ============================================================================
// Generation Handle
// ============================================================================

/// Unique identifier of one generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationId(Uuid);

impl GenerationId {
    /// Create a new random ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for GenerationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the provider side of a generation ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// The provider signalled end of stream
    Completed,
    /// The request or the stream failed
    Failed,
    /// The generation was cancelled
    Cancelled,
}

/// What a finished generation did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenerationSummary {
    /// Non-empty fragments received from the provider
    pub fragments: usize,
    /// Content batches published (terminator excluded)
    pub batches: usize,
    /// How the provider stream ended
    pub end: StreamEnd,
}

/// A running generation
#[derive(Debug)]
pub struct GenerationHandle {
    id: GenerationId,
    channel: String,
    model: String,
    cancel: CancellationToken,
    task: JoinHandle<GenerationSummary>,
}

impl GenerationHandle {
    /// Generation ID
    #[must_use]
    pub fn id(&self) -> GenerationId {
        self.id
    }

    /// Channel receiving the output
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Model producing the output
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Stop pulling from the provider
    ///
    /// Pending content is still flushed and the terminator still published.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this generation when fired
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the consumer has published the terminator
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the terminator to be published
    ///
    /// # Errors
    ///
    /// Returns the join error if the consumer task panicked.
    pub async fn join(self) -> Result<GenerationSummary, tokio::task::JoinError> {
        self.task.await
    }
}

// ============================================================================
// Relay
// ============================================================================

/// Admits user turns and streams model output into the broker
#[derive(Clone)]
pub struct Relay {
    broker: Broker,
    models: Arc<ModelRegistry>,
    backends: HashMap<ChatProvider, Arc<dyn LlmBackend>>,
    settings: RelaySettings,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("providers", &self.providers())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create a relay with no backends
    #[must_use]
    pub fn new(broker: Broker, models: ModelRegistry, settings: RelaySettings) -> Self {
        Self {
            broker,
            models: Arc::new(models),
            backends: HashMap::new(),
            settings,
        }
    }

    /// Register the backend serving its provider's models
    ///
    /// A later backend for the same provider replaces the earlier one.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        let provider = backend.provider();
        tracing::info!(provider = %provider, backend = backend.name(), "Backend registered");
        self.backends.insert(provider, backend);
        self
    }

    /// The broker output is published to
    #[must_use]
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// The model registry
    #[must_use]
    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Generation settings
    #[must_use]
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Providers with a configured backend, in stable order
    #[must_use]
    pub fn providers(&self) -> Vec<ChatProvider> {
        ChatProvider::ALL
            .into_iter()
            .filter(|p| self.backends.contains_key(p))
            .collect()
    }

    /// The backend for a provider
    #[must_use]
    pub fn backend(&self, provider: ChatProvider) -> Option<&Arc<dyn LlmBackend>> {
        self.backends.get(&provider)
    }

    /// Admit a user turn and start generating a reply
    ///
    /// Validates the channel, resolves the model (an empty name picks the
    /// default for the configured providers) and parses the parameters for
    /// the model's provider. Only then is the user message published and the
    /// generation spawned, so a rejected request leaves the channel
    /// untouched.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// See [`AskError`].
    pub fn ask(
        &self,
        channel: &str,
        body: impl Into<String>,
        model: &str,
        raw: &RawParams,
    ) -> Result<GenerationHandle, AskError> {
        params::validate_channel_id(channel)?;

        let model = if model.is_empty() {
            self.models
                .default_model(|p| self.backends.contains_key(&p))
                .ok_or(ParamError::EmptyModel)?
        } else {
            params::validate_model_name(model)?;
            model.to_owned()
        };

        let spec = self
            .models
            .get(&model)
            .ok_or_else(|| AskError::UnknownModel(model.clone()))?;
        let backend = self
            .backends
            .get(&spec.provider)
            .cloned()
            .ok_or(AskError::ProviderUnavailable(spec.provider))?;
        let params = GenerationParams::parse(raw, spec.provider, spec.max_output_tokens)?;

        self.broker.publish(Message::user(channel, body));
        let history = self.broker.history(channel, self.settings.history_limit);

        let mut request = ChatRequest::new(&model)
            .with_history(&history)
            .with_params(params);
        if let Some(system) = &self.settings.system_prompt {
            request = request.with_system(system.clone());
        }

        Ok(self.generate(channel, backend, request))
    }

    /// Stream `request` from `backend` into `channel`
    ///
    /// Spawns the producer and consumer tasks; the handle resolves once the
    /// terminator is published.
    pub fn generate(
        &self,
        channel: &str,
        backend: Arc<dyn LlmBackend>,
        request: ChatRequest,
    ) -> GenerationHandle {
        let id = GenerationId::new();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity.max(1));
        let model = request.model.clone();

        tracing::info!(
            generation = %id,
            channel = %channel,
            model = %model,
            provider = %backend.provider(),
            history = request.messages.len(),
            "Generation started"
        );

        let producer = tokio::spawn(produce(id, backend, request, tx, cancel.clone()));
        let task = tokio::spawn(consume(
            id,
            self.broker.clone(),
            channel.to_owned(),
            rx,
            self.settings.batch,
            producer,
        ));

        GenerationHandle {
            id,
            channel: channel.to_owned(),
            model,
            cancel,
            task,
        }
    }
}

// ============================================================================
// Producer / Consumer
// ============================================================================

/// Drain the provider into the queue
///
/// Dropping `tx` on return is what tells the consumer to flush.
async fn produce(
    id: GenerationId,
    backend: Arc<dyn LlmBackend>,
    request: ChatRequest,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) -> (StreamEnd, usize) {
    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return (StreamEnd::Cancelled, 0),
        opened = backend.stream_chat(&request) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(generation = %id, backend = backend.name(), error = %e, "Provider request failed");
            return (StreamEnd::Failed, 0);
        }
    };

    let mut fragments = 0;
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return (StreamEnd::Cancelled, fragments),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(fragment)) => {
                if fragment.is_empty() {
                    continue;
                }
                fragments += 1;
                // A full queue parks the producer, and with it the socket read
                let sent = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return (StreamEnd::Cancelled, fragments),
                    sent = tx.send(fragment) => sent,
                };
                if sent.is_err() {
                    tracing::debug!(generation = %id, "Consumer gone, stopping producer");
                    return (StreamEnd::Cancelled, fragments);
                }
            }
            Some(Err(e)) => {
                tracing::warn!(generation = %id, backend = backend.name(), error = %e, "Provider stream failed");
                return (StreamEnd::Failed, fragments);
            }
            None => return (StreamEnd::Completed, fragments),
        }
    }
}

/// Batch the queue into publishes, then publish the terminator
async fn consume(
    id: GenerationId,
    broker: Broker,
    channel: String,
    rx: mpsc::Receiver<String>,
    config: BatchConfig,
    producer: JoinHandle<(StreamEnd, usize)>,
) -> GenerationSummary {
    let mut batcher = StreamBatcher::new(ReceiverStream::new(rx), config);
    let mut batches = 0;

    while let Some(batch) = batcher.next_batch().await {
        match batch {
            Batch::End => {
                broker.publish(Message::end_of_stream(&channel));
            }
            batch if batch.is_trivial() => {
                tracing::trace!(generation = %id, fragments = batch.len(), "Skipping blank batch");
            }
            batch => {
                broker.publish(Message::assistant(&channel, batch.body()));
                batches += 1;
            }
        }
    }

    let (end, fragments) = match producer.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(generation = %id, error = %e, "Producer task panicked");
            (StreamEnd::Failed, 0)
        }
    };

    tracing::debug!(
        generation = %id,
        channel = %channel,
        fragments,
        batches,
        end = ?end,
        "Generation finished"
    );

    GenerationSummary {
        fragments,
        batches,
        end,
    }
}

// ============================================================================
// Tests
// ============================================================================
