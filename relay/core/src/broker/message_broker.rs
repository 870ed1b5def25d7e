//! Broker Implementation
//!
//! Publish, subscribe and snapshot over the shared channel state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::channel_log::{ChannelLog, RetentionPolicy};
use super::waiters::{WaiterId, WaiterRegistry};
use super::Envelope;
use crate::clock::{Clock, SystemClock};
use crate::messages::{Message, MessageRole};

// ============================================================================
// Shared State
// ============================================================================

/// Everything guarded by the broker lock
#[derive(Default)]
struct State {
    logs: HashMap<String, ChannelLog>,
    waiters: WaiterRegistry,
    next_waiter: u64,
}

impl State {
    fn allocate_waiter(&mut self) -> WaiterId {
        self.next_waiter += 1;
        WaiterId::from_raw(self.next_waiter)
    }
}

struct Shared {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    retention: RetentionPolicy,
}

/// Point-in-time broker counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Channels with a log
    pub channels: usize,
    /// Messages stored across all logs
    pub stored_messages: usize,
    /// Channels with at least one pending long-poll
    pub waiting_channels: usize,
    /// Pending long-polls across all channels
    pub waiters: usize,
}

// ============================================================================
// Broker
// ============================================================================

/// Per-channel append log with long-poll fan-out
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Shared>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("retention", &self.inner.retention)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Broker {
    /// Create a broker on the wall clock
    #[must_use]
    pub fn new(retention: RetentionPolicy) -> Self {
        Self::with_clock(retention, Arc::new(SystemClock))
    }

    /// Create a broker on an injected clock
    #[must_use]
    pub fn with_clock(retention: RetentionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Shared {
                state: Mutex::new(State::default()),
                clock,
                retention,
            }),
        }
    }

    /// The retention policy applied on every publish and sweep
    #[must_use]
    pub fn retention(&self) -> RetentionPolicy {
        self.inner.retention
    }

    /// Current time on the broker's clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Store a message and wake everyone waiting on its channel
    ///
    /// The broker stamps the message, renders its wire form once, appends it
    /// to the channel log, evicts expired entries and hands it to every
    /// pending waiter, all under one lock acquisition. Timestamps within a
    /// channel are strictly increasing: a clock reading that does not move
    /// past the newest stored entry is bumped by one nanosecond.
    ///
    /// A message without a channel ID cannot be routed; it is logged and
    /// dropped, and `None` is returned.
    pub fn publish(&self, mut message: Message) -> Option<Arc<Envelope>> {
        if message.channel_id.is_empty() {
            tracing::warn!(role = ?message.role, "Message dropped: missing channel ID");
            return None;
        }

        let channel = message.channel_id.clone();
        let role = message.role;

        let (envelope, encode_error, delivered, trimmed) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let now = self.inner.clock.now();

            let log = state.logs.entry(channel.clone()).or_default();
            message.timestamp = match log.newest_timestamp() {
                Some(newest) if now <= newest => newest + chrono::Duration::nanoseconds(1),
                _ => now,
            };

            let (envelope, encode_error) = Envelope::encode(message);
            let envelope = Arc::new(envelope);

            log.push(Arc::clone(&envelope));
            let trimmed = log.trim(now, &self.inner.retention);
            let delivered = state.waiters.deliver(&channel, &envelope);

            (envelope, encode_error, delivered, trimmed)
        };

        if let Some(e) = encode_error {
            tracing::error!(channel = %channel, error = %e, "JSON marshal error");
        }
        tracing::debug!(
            channel = %channel,
            role = ?role,
            bytes = envelope.json().len(),
            delivered,
            trimmed,
            "Message published"
        );

        Some(envelope)
    }

    /// Publish from parts
    pub fn publish_text(
        &self,
        channel: impl Into<String>,
        body: impl Into<String>,
        role: MessageRole,
    ) -> Option<Arc<Envelope>> {
        self.publish(Message::new(channel, body, role))
    }

    /// Wait for the next message on `channel` after the cursor `after`
    ///
    /// If the log already holds a message newer than `after`, the earliest
    /// such message is queued into the returned handle immediately, so a
    /// client that always passes the timestamp of the last message it saw
    /// walks the log in order. Otherwise the caller is parked until the next
    /// publish. Without a cursor the caller always parks: fresh subscribers
    /// never get history replayed.
    ///
    /// Dropping the returned [`Subscription`] cancels the wait.
    #[must_use]
    pub fn subscribe(&self, channel: &str, after: Option<DateTime<Utc>>) -> Subscription {
        let (slot, receiver) = oneshot::channel();

        let mut state = self.inner.state.lock();

        // Without a cursor nothing stored counts as next. Bumped timestamps
        // can sit ahead of the clock, so comparing against now would replay.
        let backlog = after.and_then(|after| {
            state
                .logs
                .get(channel)
                .and_then(|log| log.first_after(after))
                .cloned()
        });

        let waiter = match backlog {
            Some(envelope) => {
                // Receiver is alive in this frame, send cannot fail
                let _ = slot.send(envelope);
                None
            }
            None => {
                let id = state.allocate_waiter();
                state.waiters.register(channel, id, slot);
                Some(id)
            }
        };
        drop(state);

        Subscription {
            broker: self.clone(),
            channel: channel.to_owned(),
            waiter,
            receiver,
        }
    }

    /// Subscribe and wait in one call
    pub async fn wait(
        &self,
        channel: &str,
        after: Option<DateTime<Utc>>,
        timeout: Duration,
    ) -> Delivery {
        self.subscribe(channel, after).wait(timeout).await
    }

    /// Stored messages on `channel` newer than `after` (all when `None`),
    /// newest first
    ///
    /// Never blocks on waiters and never mutates state.
    #[must_use]
    pub fn snapshot(&self, channel: &str, after: Option<DateTime<Utc>>) -> Vec<Arc<Envelope>> {
        let state = self.inner.state.lock();
        state
            .logs
            .get(channel)
            .map(|log| log.newest_first(after))
            .unwrap_or_default()
    }

    /// Recent conversation on `channel`, oldest first
    ///
    /// Takes the newest `max` stored entries (all when `max` is zero) and
    /// keeps only user and assistant messages with a body.
    #[must_use]
    pub fn history(&self, channel: &str, max: usize) -> Vec<Message> {
        let tail: Vec<Arc<Envelope>> = {
            let state = self.inner.state.lock();
            match state.logs.get(channel) {
                Some(log) => log.tail(max).to_vec(),
                None => return Vec::new(),
            }
        };

        tail.iter()
            .map(|e| e.message())
            .filter(|m| m.is_conversational())
            .cloned()
            .collect()
    }

    /// Apply retention to every channel
    ///
    /// Publishing trims the channel it writes to; this catches channels that
    /// have gone quiet. Returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        let (trimmed, dropped_channels) = {
            let mut state = self.inner.state.lock();
            let now = self.inner.clock.now();
            let retention = self.inner.retention;

            let trimmed: usize = state
                .logs
                .values_mut()
                .map(|log| log.trim(now, &retention))
                .sum();

            let before = state.logs.len();
            state.logs.retain(|_, log| !log.is_empty());
            (trimmed, before - state.logs.len())
        };

        if trimmed > 0 || dropped_channels > 0 {
            tracing::debug!(trimmed, dropped_channels, "Retention sweep");
        }
        trimmed
    }

    /// Broker counters
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let state = self.inner.state.lock();
        BrokerStats {
            channels: state.logs.len(),
            stored_messages: state.logs.values().map(ChannelLog::len).sum(),
            waiting_channels: state.waiters.channel_count(),
            waiters: state.waiters.total(),
        }
    }

    /// Number of long-polls parked on `channel`
    #[must_use]
    pub fn waiting_on(&self, channel: &str) -> usize {
        self.inner.state.lock().waiters.waiting_on(channel)
    }

    /// A fresh timeout sentinel stamped with the current time
    ///
    /// Sentinels are never stored.
    #[must_use]
    pub fn timeout_sentinel(&self) -> Arc<Envelope> {
        Arc::new(Envelope::new(Message::timeout_sentinel(self.now())))
    }

    fn unregister(&self, channel: &str, id: WaiterId) -> bool {
        self.inner.state.lock().waiters.unregister(channel, id)
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Outcome of a completed long-poll
#[derive(Clone, Debug)]
pub enum Delivery {
    /// A published message
    Message(Arc<Envelope>),
    /// Nothing arrived in time; carries the sentinel to send back
    Timeout(Arc<Envelope>),
}

impl Delivery {
    /// The envelope to hand to the client
    #[must_use]
    pub fn envelope(&self) -> &Arc<Envelope> {
        match self {
            Self::Message(e) | Self::Timeout(e) => e,
        }
    }

    /// The serialized wire form
    #[must_use]
    pub fn json(&self) -> &str {
        self.envelope().json()
    }

    /// Whether the wait expired
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// A pending long-poll
///
/// Dropping it deregisters the waiter, which is how a client disconnect
/// cancels the wait.
pub struct Subscription {
    broker: Broker,
    channel: String,
    waiter: Option<WaiterId>,
    receiver: oneshot::Receiver<Arc<Envelope>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("waiter", &self.waiter)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// The channel being waited on
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The registered waiter, `None` when a backlog message was queued
    /// immediately
    #[must_use]
    pub fn waiter_id(&self) -> Option<WaiterId> {
        self.waiter
    }

    /// Block until a message arrives or `timeout` elapses
    pub async fn wait(mut self, timeout: Duration) -> Delivery {
        if let Ok(Ok(envelope)) = tokio::time::timeout(timeout, &mut self.receiver).await {
            self.waiter = None;
            return Delivery::Message(envelope);
        }

        // Deregister first so no publish can slip in after the final check.
        self.deregister();
        match self.receiver.try_recv() {
            Ok(envelope) => Delivery::Message(envelope),
            Err(_) => Delivery::Timeout(self.broker.timeout_sentinel()),
        }
    }

    /// Like [`wait`](Self::wait), returning `None` if `cancel` fires first
    pub async fn wait_or_cancel(
        self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<Delivery> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            delivery = self.wait(timeout) => Some(delivery),
        }
    }

    fn deregister(&mut self) {
        if let Some(id) = self.waiter.take() {
            self.broker.unregister(&self.channel, id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(id) = self.waiter.take() {
            if self.broker.unregister(&self.channel, id) {
                tracing::trace!(channel = %self.channel, waiter = %id, "Long-poll cancelled");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
