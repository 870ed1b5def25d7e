//! Waiter Registry - Pending Long-Poll Subscribers
//!
//! Each pending long-poll owns a single-slot delivery handle (a oneshot
//! sender). The registry groups them by channel so a publish can hand the
//! new message to every waiter on that channel and forget them in one pass.
//!
//! # Architecture
//!
//! ```text
//!                       WaiterRegistry
//!   ┌────────────────────────────────────────────────────────┐
//!   │ HashMap<channel, HashMap<WaiterId, oneshot::Sender>>   │
//!   └──────────────┬───────────────────────┬─────────────────┘
//!                  │                       │
//!           ┌──────▼──────┐         ┌──────▼──────┐
//!           │  "lobby"    │         │  "support"  │
//!           │ w-1, w-7    │         │ w-3         │
//!           └─────────────┘         └─────────────┘
//! ```
//!
//! The registry itself is not synchronised; the broker's lock guards it
//! together with the channel logs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;

use super::Envelope;

/// Identifier of one pending subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

impl WaiterId {
    /// Wrap a raw value
    #[must_use]
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w-{}", self.0)
    }
}

/// Delivery side of a waiter's single-slot handle
pub(crate) type WaiterSlot = oneshot::Sender<Arc<Envelope>>;

/// Pending subscribers grouped by channel
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    channels: HashMap<String, HashMap<WaiterId, WaiterSlot>>,
}

impl WaiterRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a waiter on a channel
    pub(crate) fn register(&mut self, channel: &str, id: WaiterId, slot: WaiterSlot) {
        self.channels
            .entry(channel.to_owned())
            .or_default()
            .insert(id, slot);
        tracing::trace!(channel = %channel, waiter = %id, "Waiter registered");
    }

    /// Remove a waiter without delivering anything
    ///
    /// Returns false when the waiter was already gone (delivered or removed).
    pub fn unregister(&mut self, channel: &str, id: WaiterId) -> bool {
        let Some(waiters) = self.channels.get_mut(channel) else {
            return false;
        };
        let removed = waiters.remove(&id).is_some();
        if waiters.is_empty() {
            self.channels.remove(channel);
        }
        if removed {
            tracing::trace!(channel = %channel, waiter = %id, "Waiter unregistered");
        }
        removed
    }

    /// Hand `envelope` to every waiter on `channel` and drop them all
    ///
    /// Never blocks: each slot holds exactly one value. Waiters whose
    /// receiving side is already gone are skipped. Returns how many waiters
    /// actually received the message.
    pub fn deliver(&mut self, channel: &str, envelope: &Arc<Envelope>) -> usize {
        let Some(waiters) = self.channels.remove(channel) else {
            return 0;
        };
        waiters
            .into_values()
            .map(|slot| slot.send(Arc::clone(envelope)))
            .filter(Result::is_ok)
            .count()
    }

    /// Number of waiters parked on `channel`
    #[must_use]
    pub fn waiting_on(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, HashMap::len)
    }

    /// Whether `id` is still parked on `channel`
    #[must_use]
    pub fn contains(&self, channel: &str, id: WaiterId) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|waiters| waiters.contains_key(&id))
    }

    /// Total waiters across all channels
    #[must_use]
    pub fn total(&self) -> usize {
        self.channels.values().map(HashMap::len).sum()
    }

    /// Number of channels with at least one waiter
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;

    fn envelope(body: &str) -> Arc<Envelope> {
        Arc::new(Envelope::new(Message::assistant("lobby", body)))
    }

    #[test]
    fn test_register_and_unregister_cleans_up_channel() {
        let mut registry = WaiterRegistry::new();
        let (tx, _rx) = oneshot::channel();
        let id = WaiterId::from_raw(1);

        registry.register("lobby", id, tx);
        assert_eq!(registry.waiting_on("lobby"), 1);
        assert!(registry.contains("lobby", id));

        assert!(registry.unregister("lobby", id));
        assert_eq!(registry.waiting_on("lobby"), 0);
        assert_eq!(registry.channel_count(), 0);

        // Second removal is a no-op
        assert!(!registry.unregister("lobby", id));
    }

    #[test]
    fn test_deliver_reaches_every_waiter_once() {
        let mut registry = WaiterRegistry::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        registry.register("lobby", WaiterId::from_raw(1), tx1);
        registry.register("lobby", WaiterId::from_raw(2), tx2);

        let delivered = registry.deliver("lobby", &envelope("hello"));
        assert_eq!(delivered, 2);
        assert_eq!(registry.total(), 0);

        assert_eq!(rx1.try_recv().unwrap().message().body, "hello");
        assert_eq!(rx2.try_recv().unwrap().message().body, "hello");

        // Nobody left to deliver to
        assert_eq!(registry.deliver("lobby", &envelope("again")), 0);
    }

    #[test]
    fn test_deliver_is_scoped_to_channel() {
        let mut registry = WaiterRegistry::new();
        let (tx_a, mut rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();
        registry.register("a", WaiterId::from_raw(1), tx_a);
        registry.register("b", WaiterId::from_raw(2), tx_b);

        registry.deliver("a", &envelope("for a"));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
        assert_eq!(registry.waiting_on("b"), 1);
    }

    #[test]
    fn test_deliver_skips_abandoned_waiters() {
        let mut registry = WaiterRegistry::new();
        let (tx, rx) = oneshot::channel();
        registry.register("lobby", WaiterId::from_raw(9), tx);
        drop(rx);

        assert_eq!(registry.deliver("lobby", &envelope("lost")), 0);
        assert_eq!(registry.total(), 0);
    }

    #[test]
    fn test_waiter_id_display() {
        assert_eq!(WaiterId::from_raw(42).to_string(), "w-42");
    }
}
