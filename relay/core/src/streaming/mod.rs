//! Streaming Generations
//!
//! Turns a provider's fragment stream into channel publishes.
//!
//! # Architecture
//!
//! ```text
//!              ┌────────────────────────── one generation ──────────────────────────┐
//!              │                                                                    │
//!  LlmBackend ─┼─► producer task ──► mpsc (bounded) ──► consumer task ──► Broker     │
//!              │   pulls fragments    backpressure      StreamBatcher     publish    │
//!              │   honours cancel     reaches socket    skips trivial     + End      │
//!              └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The consumer always publishes exactly one empty assistant message after
//! the last content batch, whether the provider finished, failed or the
//! generation was cancelled.

mod batcher;
mod relay;

pub use batcher::{Batch, BatchConfig, StreamBatcher};
pub use relay::{
    AskError, GenerationHandle, GenerationId, GenerationSummary, Relay, RelaySettings, StreamEnd,
};
