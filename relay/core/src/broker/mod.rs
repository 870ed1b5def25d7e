//! Message Broker
//!
//! The single source of truth for "what happened on channel X, and who is
//! waiting to hear about it next". A [`Broker`] composes one [`ChannelLog`]
//! per channel with a [`WaiterRegistry`] behind one process-wide lock.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         Broker (Arc)                          │
//! │  ┌─────────────────────────────────────────────────────────┐  │
//! │  │                 parking_lot::Mutex<State>               │  │
//! │  │  ┌────────────────────────┐  ┌───────────────────────┐  │  │
//! │  │  │ logs: channel → log    │  │ waiters: channel →    │  │  │
//! │  │  │ [oldest ... newest]    │  │ { WaiterId → slot }   │  │  │
//! │  │  └────────────────────────┘  └───────────────────────┘  │  │
//! │  └─────────────────────────────────────────────────────────┘  │
//! │          ▲ publish            ▲ subscribe        ▲ snapshot   │
//! └──────────┼────────────────────┼──────────────────┼────────────┘
//!     batches / user input    long-poll           recent history
//! ```
//!
//! # Guarantees
//!
//! - `publish` appends, trims and delivers under one lock acquisition, so a
//!   waiter can never register between the append and the delivery.
//! - Delivery writes into a single-slot handle and never blocks.
//! - Each waiter receives at most one message.
//! - `subscribe` blocks outside the lock.

mod channel_log;
mod message_broker;
mod waiters;

use chrono::{DateTime, Utc};

use crate::messages::Message;

pub use channel_log::{ChannelLog, RetentionPolicy};
pub use message_broker::{Broker, BrokerStats, Delivery, Subscription};
pub use waiters::{WaiterId, WaiterRegistry};

/// A stamped message together with its serialized wire form
///
/// The JSON is rendered once at publish time and shared by every waiter,
/// snapshot and history reader.
#[derive(Debug)]
pub struct Envelope {
    message: Message,
    json: String,
}

impl Envelope {
    /// Serialize `message`, logging and falling back to an empty body on
    /// failure
    #[must_use]
    pub fn new(message: Message) -> Self {
        let (envelope, error) = Self::encode(message);
        if let Some(e) = error {
            tracing::error!(error = %e, "JSON marshal error");
        }
        envelope
    }

    /// Serialize without logging; the error is handed back to the caller
    pub(crate) fn encode(message: Message) -> (Self, Option<serde_json::Error>) {
        match message.to_wire_json() {
            Ok(json) => (Self { message, json }, None),
            Err(e) => (
                Self {
                    message,
                    json: String::new(),
                },
                Some(e),
            ),
        }
    }

    /// The stamped message
    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// The serialized wire form
    #[must_use]
    pub fn json(&self) -> &str {
        &self.json
    }

    /// Publish time, the long-poll cursor for this message
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.message.timestamp
    }

    /// Whether this is a long-poll timeout sentinel
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.message.long_poll_timeout
    }
}

impl AsRef<Message> for Envelope {
    fn as_ref(&self) -> &Message {
        &self.message
    }
}
