//! The pub/sub bus (C7) and the reorder buffer that lets a session recover
//! FIFO order out of an at-least-once delivery stream.
//!
//! The engine has no knowledge of sockets or async runtimes, so `Bus` models
//! publish/subscribe as plain in-memory mailboxes: `publish` appends to every
//! current subscriber's inbox, `drain` hands a subscriber everything queued
//! for it in FIFO order. The transport layer is responsible for turning a
//! drained message into a wire frame.

use std::collections::{BTreeMap, HashMap, VecDeque};

/// An opaque handle returned by `subscribe`, needed to `drain` or `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// Per-topic FIFO mailboxes, at-least-once until drained.
#[derive(Debug, Clone)]
pub struct Bus<T: Clone> {
    next_id: u64,
    topics: HashMap<String, HashMap<u64, VecDeque<T>>>,
}

impl<T: Clone> Default for Bus<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            topics: HashMap::new(),
        }
    }
}

impl<T: Clone> Bus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, topic: impl Into<String>) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;
        self.topics.entry(topic.into()).or_default().insert(id, VecDeque::new());
        Subscription(id)
    }

    pub fn unsubscribe(&mut self, topic: &str, subscription: Subscription) {
        if let Some(subscribers) = self.topics.get_mut(topic) {
            subscribers.remove(&subscription.0);
        }
    }

    /// At-least-once: queue `msg` onto every subscriber currently on `topic`.
    pub fn publish(&mut self, topic: &str, msg: T) {
        if let Some(subscribers) = self.topics.get_mut(topic) {
            for inbox in subscribers.values_mut() {
                inbox.push_back(msg.clone());
            }
        }
    }

    /// Drain everything queued for one subscriber, oldest first.
    pub fn drain(&mut self, topic: &str, subscription: Subscription) -> Vec<T> {
        self.topics
            .get_mut(topic)
            .and_then(|subscribers| subscribers.get_mut(&subscription.0))
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn pending_count(&self, topic: &str, subscription: Subscription) -> usize {
        self.topics
            .get(topic)
            .and_then(|subscribers| subscribers.get(&subscription.0))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Drop an entire topic and every subscriber mailbox on it. For a topic
    /// with no active or reconnect-eligible sessions left, this reclaims the
    /// map entry instead of letting it sit empty for the life of the process.
    pub fn drop_topic(&mut self, topic: &str) {
        self.topics.remove(topic);
    }
}

/// Outcome of feeding one sequenced item into a `ReorderBuffer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderOutcome<T> {
    /// In-order (possibly after filling a gap): deliver these, oldest first.
    Ready(Vec<T>),
    /// Held, waiting for an earlier sequence number to arrive.
    Buffered,
    /// The gap exceeded capacity or timeout; the buffer was dropped. The
    /// caller must force the session into `CATCHING_UP` and `pull` the tail.
    GapTimeout { expected: u64, dropped: usize },
}

/// Re-sorts an at-least-once, possibly-out-of-order stream of `(seq, item)`
/// pairs back into strict ascending order, within bounded resources.
#[derive(Debug, Clone)]
pub struct ReorderBuffer<T> {
    capacity: usize,
    timeout_ms: u64,
    next_expected: u64,
    pending: BTreeMap<u64, (T, u64)>,
}

impl<T: Clone + PartialEq> ReorderBuffer<T> {
    /// `next_expected` is the first sequence number the session has not yet
    /// seen (typically `last_ack_seq + 1`).
    pub fn new(next_expected: u64) -> Self {
        Self::with_config(next_expected, 64, 2_000)
    }

    pub fn with_config(next_expected: u64, capacity: usize, timeout_ms: u64) -> Self {
        Self {
            capacity,
            timeout_ms,
            next_expected,
            pending: BTreeMap::new(),
        }
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Feed one arrival. `now_ms` is the caller's clock, used only to bound
    /// how long a gap may sit buffered.
    pub fn ingest(&mut self, seq: u64, item: T, now_ms: u64) -> ReorderOutcome<T> {
        if seq < self.next_expected {
            // Already delivered; at-least-once duplicate, drop silently.
            return ReorderOutcome::Ready(Vec::new());
        }

        if seq == self.next_expected {
            let mut ready = vec![item];
            self.next_expected += 1;
            while let Some((next_item, _)) = self.pending.remove(&self.next_expected) {
                ready.push(next_item);
                self.next_expected += 1;
            }
            return ReorderOutcome::Ready(ready);
        }

        self.pending.insert(seq, (item, now_ms));

        if let Some(timeout) = self.check_timeout(now_ms) {
            return timeout;
        }

        if self.pending.len() > self.capacity {
            return self.force_gap_timeout();
        }

        ReorderOutcome::Buffered
    }

    /// Time-driven check for a stalled gap with no new arrivals to trigger it.
    pub fn check_timeout(&mut self, now_ms: u64) -> Option<ReorderOutcome<T>> {
        let oldest = self.pending.values().map(|(_, arrived)| *arrived).min()?;
        if now_ms.saturating_sub(oldest) >= self.timeout_ms {
            Some(self.force_gap_timeout())
        } else {
            None
        }
    }

    fn force_gap_timeout(&mut self) -> ReorderOutcome<T> {
        let dropped = self.pending.len();
        let expected = self.next_expected;
        self.pending.clear();
        ReorderOutcome::GapTimeout { expected, dropped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_delivers_to_all_subscribers_fifo() {
        let mut bus: Bus<u64> = Bus::new();
        let s1 = bus.subscribe("owner-1");
        let s2 = bus.subscribe("owner-1");

        bus.publish("owner-1", 1);
        bus.publish("owner-1", 2);

        assert_eq!(bus.drain("owner-1", s1), vec![1, 2]);
        assert_eq!(bus.drain("owner-1", s2), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_further_delivery() {
        let mut bus: Bus<u64> = Bus::new();
        let s1 = bus.subscribe("owner-1");
        bus.publish("owner-1", 1);
        bus.unsubscribe("owner-1", s1);
        bus.publish("owner-1", 2);

        // s1 is gone; nothing to drain under its handle (topic map no longer has it).
        assert_eq!(bus.pending_count("owner-1", s1), 0);
    }

    #[test]
    fn drop_topic_clears_its_subscribers() {
        let mut bus: Bus<u64> = Bus::new();
        let s1 = bus.subscribe("owner-1");
        bus.publish("owner-1", 1);
        bus.drop_topic("owner-1");
        assert_eq!(bus.pending_count("owner-1", s1), 0);
        assert!(bus.drain("owner-1", s1).is_empty());
    }

    #[test]
    fn topics_are_independent() {
        let mut bus: Bus<u64> = Bus::new();
        let s1 = bus.subscribe("owner-1");
        let s2 = bus.subscribe("owner-2");
        bus.publish("owner-1", 42);

        assert_eq!(bus.drain("owner-1", s1), vec![42]);
        assert!(bus.drain("owner-2", s2).is_empty());
    }

    #[test]
    fn reorder_buffer_delivers_in_order_immediately() {
        let mut buf = ReorderBuffer::new(1);
        assert_eq!(buf.ingest(1, "a", 0), ReorderOutcome::Ready(vec!["a"]));
        assert_eq!(buf.ingest(2, "b", 1), ReorderOutcome::Ready(vec!["b"]));
    }

    #[test]
    fn reorder_buffer_fills_gap_and_flushes() {
        let mut buf = ReorderBuffer::new(1);
        assert_eq!(buf.ingest(3, "c", 0), ReorderOutcome::Buffered);
        assert_eq!(buf.ingest(2, "b", 1), ReorderOutcome::Buffered);
        assert_eq!(buf.ingest(1, "a", 2), ReorderOutcome::Ready(vec!["a", "b", "c"]));
        assert_eq!(buf.next_expected(), 4);
    }

    #[test]
    fn duplicate_seq_is_dropped() {
        let mut buf = ReorderBuffer::new(1);
        buf.ingest(1, "a", 0);
        assert_eq!(buf.ingest(1, "a", 1), ReorderOutcome::Ready(Vec::new()));
    }

    #[test]
    fn gap_beyond_capacity_forces_timeout() {
        let mut buf = ReorderBuffer::with_config(1, 2, 2_000);
        buf.ingest(2, "b", 0);
        buf.ingest(3, "c", 0);
        let outcome = buf.ingest(4, "d", 0);
        assert_eq!(
            outcome,
            ReorderOutcome::GapTimeout {
                expected: 1,
                dropped: 3
            }
        );
    }

    #[test]
    fn gap_beyond_timeout_window_forces_catch_up() {
        let mut buf = ReorderBuffer::with_config(1, 64, 2_000);
        buf.ingest(2, "b", 0);
        let timed_out = buf.check_timeout(2_500);
        assert_eq!(
            timed_out,
            Some(ReorderOutcome::GapTimeout {
                expected: 1,
                dropped: 1
            })
        );
    }

    #[test]
    fn no_timeout_within_window() {
        let mut buf = ReorderBuffer::with_config(1, 64, 2_000);
        buf.ingest(2, "b", 0);
        assert_eq!(buf.check_timeout(1_000), None);
    }
}
