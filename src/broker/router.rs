//! Destination routing and queue dispatch
//!
//! Topics fan out to every subscribed connection. Queues are fair-share: a
//! listener group per queue tracks which subscriptions may receive the next
//! message (`ready`), which have exhausted their prefetch (`blocked`), and a
//! round-robin cursor pointing at the last subscription that received one.
//!
//! Everywhere a "next" or "min" is taken, the order is descending connection
//! id, so the cursor advances through every member before wrapping.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::writer::SharedWriter;

/// One consumer's binding to a destination on one connection.
///
/// Shared by reference between the connection's local subscription map and
/// the listener group of the same queue. A connection holds at most one
/// subscription per queue; listener-group membership is keyed by connection
/// id alone.
#[derive(Debug)]
pub struct Subscription {
    pub destination: String,
    pub prefetch: usize,
    /// Ids of messages sent to this subscription and not yet acknowledged.
    pending_acks: Mutex<HashSet<String>>,
}

impl Subscription {
    pub fn new(destination: impl Into<String>, prefetch: usize) -> Self {
        Self {
            destination: destination.into(),
            prefetch,
            pending_acks: Mutex::new(HashSet::new()),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending_acks.lock().len()
    }

    pub fn track(&self, message_id: &str) {
        self.pending_acks.lock().insert(message_id.to_string());
    }

    /// A saturated subscription has reached its prefetch and may not receive
    /// further messages until swept back to ready.
    pub fn is_saturated(&self) -> bool {
        self.pending() >= self.prefetch
    }
}

struct QueueSubscriber {
    writer: Arc<SharedWriter>,
    subscription: Arc<Subscription>,
}

/// Per-queue bookkeeping: the ready and blocked subscriber sets plus the
/// round-robin cursor. Keys are `Reverse(conn_id)`, so iteration order is
/// descending connection id and `first_key_value` is the minimum under that
/// order.
#[derive(Default)]
struct ListenerGroup {
    ready: BTreeMap<Reverse<u64>, QueueSubscriber>,
    blocked: BTreeMap<Reverse<u64>, QueueSubscriber>,
    last_sent: Option<u64>,
}

impl ListenerGroup {
    fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.blocked.is_empty()
    }

    fn contains(&self, conn_id: u64) -> bool {
        let key = Reverse(conn_id);
        self.ready.contains_key(&key) || self.blocked.contains_key(&key)
    }

    /// Move every blocked subscriber back under its prefetch into ready.
    fn unblock_sweep(&mut self) {
        let newly_ready: Vec<Reverse<u64>> = self
            .blocked
            .iter()
            .filter(|(_, s)| !s.subscription.is_saturated())
            .map(|(&key, _)| key)
            .collect();
        for key in newly_ready {
            if let Some(subscriber) = self.blocked.remove(&key) {
                self.ready.insert(key, subscriber);
            }
        }
    }

    /// Successor of `after` in `set`, wrapping to the first entry past the
    /// end.
    fn successor(set: &BTreeMap<Reverse<u64>, QueueSubscriber>, after: u64) -> Option<Reverse<u64>> {
        set.range((Excluded(Reverse(after)), Unbounded))
            .next()
            .or_else(|| set.first_key_value())
            .map(|(&key, _)| key)
    }

    /// Select the next recipient per the round-robin policy.
    ///
    /// When every subscriber is at capacity even after a sweep, the message
    /// still goes to the cursor's successor among the blocked pairs; a queue
    /// with a listener group never spills to persistence.
    fn select(&mut self) -> Option<Reverse<u64>> {
        // The cursor may point at a departed subscriber.
        if let Some(cursor) = self.last_sent {
            if !self.contains(cursor) {
                self.last_sent = None;
            }
        }

        match self.last_sent {
            None => {
                if self.ready.is_empty() {
                    self.unblock_sweep();
                }
                self.ready
                    .first_key_value()
                    .or_else(|| self.blocked.first_key_value())
                    .map(|(&key, _)| key)
            }
            Some(cursor) => {
                if self.ready.is_empty() {
                    self.unblock_sweep();
                }
                if self.ready.is_empty() {
                    return Self::successor(&self.blocked, cursor);
                }
                let succ = Self::successor(&self.ready, cursor)?;
                let min = self.ready.first_key_value().map(|(&key, _)| key)?;
                if succ == min {
                    // The cursor wrapped through the whole ready set; give
                    // blocked subscribers a chance to rejoin first.
                    self.unblock_sweep();
                    Self::successor(&self.ready, cursor)
                } else {
                    Some(succ)
                }
            }
        }
    }
}

/// Outcome of a queue dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A MESSAGE frame was handed to a subscriber's writer.
    Delivered,
    /// The queue has no listener group; the caller persists the message.
    NoListeners,
}

/// Routing state shared by every connection: the topic index, the queue
/// index, and the dispatch entry points.
#[derive(Default)]
pub struct Router {
    topics: Mutex<HashMap<String, BTreeMap<Reverse<u64>, Arc<SharedWriter>>>>,
    queues: Mutex<HashMap<String, ListenerGroup>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Topic index
    // ========================================================================

    pub fn attach_topic(&self, topic: &str, writer: Arc<SharedWriter>) {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .insert(Reverse(writer.conn_id()), writer);
    }

    /// Remove `conn_id` from the topic's set; drop the entry when it empties.
    pub fn detach_topic(&self, topic: &str, conn_id: u64) {
        let mut topics = self.topics.lock();
        if let Some(members) = topics.get_mut(topic) {
            members.remove(&Reverse(conn_id));
            if members.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Fan a pre-serialized MESSAGE frame out to every subscriber of `topic`.
    ///
    /// Fire-and-forget: a closed member does not abort the publish. Returns
    /// the number of writers the frame was handed to.
    pub fn publish_topic(&self, topic: &str, frame: &[u8]) -> usize {
        let topics = self.topics.lock();
        let Some(members) = topics.get(topic) else {
            return 0;
        };
        let mut delivered = 0;
        for writer in members.values() {
            if writer.send_bytes(frame).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    // ========================================================================
    // Queue index
    // ========================================================================

    /// Insert the pair into the queue's ready set, creating the listener
    /// group if the queue is new. Replaces any subscription this connection
    /// already held on the queue.
    pub fn attach_queue(
        &self,
        queue: &str,
        writer: Arc<SharedWriter>,
        subscription: Arc<Subscription>,
    ) {
        let mut queues = self.queues.lock();
        let group = queues.entry(queue.to_string()).or_default();
        let key = Reverse(writer.conn_id());
        group.blocked.remove(&key);
        group.ready.insert(
            key,
            QueueSubscriber {
                writer,
                subscription,
            },
        );
    }

    /// Remove any pair keyed by this connection from both sets; drop the
    /// group when both are empty.
    pub fn detach_queue(&self, queue: &str, conn_id: u64) {
        let mut queues = self.queues.lock();
        if let Some(group) = queues.get_mut(queue) {
            let key = Reverse(conn_id);
            group.ready.remove(&key);
            group.blocked.remove(&key);
            if group.last_sent == Some(conn_id) {
                group.last_sent = None;
            }
            if group.is_empty() {
                queues.remove(queue);
            }
        }
    }

    /// Re-partition one subscriber after its pending set changed outside a
    /// dispatch (persisted replay on subscribe).
    pub fn update_flow(&self, queue: &str, conn_id: u64) {
        let mut queues = self.queues.lock();
        if let Some(group) = queues.get_mut(queue) {
            let key = Reverse(conn_id);
            let saturated = group
                .ready
                .get(&key)
                .map(|s| s.subscription.is_saturated())
                .unwrap_or(false);
            if saturated {
                if let Some(subscriber) = group.ready.remove(&key) {
                    group.blocked.insert(key, subscriber);
                }
            }
        }
    }

    /// Dispatch one queue message: select the next eligible subscriber,
    /// update flow-control state, then hand the frame to its writer.
    pub fn dispatch_queue(&self, queue: &str, message_id: &str, frame: &[u8]) -> DispatchOutcome {
        let mut queues = self.queues.lock();
        let Some(group) = queues.get_mut(queue) else {
            return DispatchOutcome::NoListeners;
        };
        let Some(key) = group.select() else {
            // A group never outlives its last member; treat a somehow-empty
            // one like a missing group.
            return DispatchOutcome::NoListeners;
        };

        let in_ready = group.ready.contains_key(&key);
        let target = if in_ready {
            group.ready.get(&key)
        } else {
            group.blocked.get(&key)
        };
        let Some((subscription, writer)) =
            target.map(|t| (t.subscription.clone(), t.writer.clone()))
        else {
            return DispatchOutcome::NoListeners;
        };

        // Flow-control mutations happen before the frame is handed over, so
        // the next dispatch observes the post-send state.
        subscription.track(message_id);
        writer.add_unacked(1);
        group.last_sent = Some(key.0);

        if in_ready && subscription.is_saturated() {
            debug!("queue subscriber {} reached prefetch, blocking", key.0);
            if let Some(subscriber) = group.ready.remove(&key) {
                group.blocked.insert(key, subscriber);
            }
        }

        // In-flight writes to a terminating connection fail silently.
        let _ = writer.send_bytes(frame);
        DispatchOutcome::Delivered
    }

    // ========================================================================
    // Teardown and introspection
    // ========================================================================

    /// Remove a departing connection from every index entry it appears in.
    /// The name lists come from the connection's local subscription maps.
    pub fn disconnect(&self, conn_id: u64, topic_names: &[String], queue_names: &[String]) {
        for name in topic_names {
            self.detach_topic(name, conn_id);
        }
        for name in queue_names {
            self.detach_queue(name, conn_id);
        }
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().len()
    }

    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn topic_members(&self, topic: &str) -> Vec<u64> {
        self.topics
            .lock()
            .get(topic)
            .map(|members| members.keys().map(|key| key.0).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn queue_ready(&self, queue: &str) -> Vec<u64> {
        self.queues
            .lock()
            .get(queue)
            .map(|group| group.ready.keys().map(|key| key.0).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn queue_blocked(&self, queue: &str) -> Vec<u64> {
        self.queues
            .lock()
            .get(queue)
            .map(|group| group.blocked.keys().map(|key| key.0).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn queue_cursor(&self, queue: &str) -> Option<u64> {
        self.queues.lock().get(queue).and_then(|group| group.last_sent)
    }
}
