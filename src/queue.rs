//! Bounded outbound buffer used while the link is down or rate limited.
//!
//! Invariant: `len() <= capacity()` after every call. The bound is enforced at enqueue time by
//! the configured [`DropStrategy`]; nothing is trimmed retroactively.

use crate::transport::Payload;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Default queue capacity.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1_000;

/// What to discard when a message arrives at a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropStrategy {
    /// Evict the head (oldest message) to make room.
    #[default]
    Oldest,
    /// Reject the incoming message; existing contents stay untouched.
    Newest,
}

impl fmt::Display for DropStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropStrategy::Oldest => f.write_str("oldest"),
            DropStrategy::Newest => f.write_str("newest"),
        }
    }
}

/// A message waiting for transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub payload: Payload,
    /// Clock reading (ms) at enqueue time.
    pub enqueued_at: u64,
}

impl QueuedMessage {
    pub fn new(payload: Payload, enqueued_at: u64) -> Self {
        Self { payload, enqueued_at }
    }
}

/// Bounded FIFO with a drop strategy.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    items: VecDeque<QueuedMessage>,
    capacity: usize,
    strategy: DropStrategy,
}

impl MessageQueue {
    pub fn new(capacity: usize, strategy: DropStrategy) -> Self {
        Self { items: VecDeque::with_capacity(capacity.min(1024)), capacity, strategy }
    }

    /// Append a message, applying the drop strategy when full.
    ///
    /// Returns the message that was discarded to honor the bound: the evicted head under
    /// [`DropStrategy::Oldest`], the incoming message under [`DropStrategy::Newest`].
    pub fn enqueue(&mut self, message: QueuedMessage) -> Option<QueuedMessage> {
        if self.capacity == 0 {
            return Some(message);
        }
        if self.items.len() < self.capacity {
            self.items.push_back(message);
            return None;
        }
        match self.strategy {
            DropStrategy::Oldest => {
                let evicted = self.items.pop_front();
                self.items.push_back(message);
                evicted
            }
            DropStrategy::Newest => Some(message),
        }
    }

    /// Remove and return every message in enqueue order.
    pub fn drain(&mut self) -> Vec<QueuedMessage> {
        self.items.drain(..).collect()
    }

    /// Put undelivered messages back at the head, ahead of anything queued since, keeping their
    /// order. Anything beyond capacity is trimmed from the tail and returned.
    pub fn restore<I>(&mut self, messages: I) -> Vec<QueuedMessage>
    where
        I: IntoIterator<Item = QueuedMessage>,
    {
        let mut restored: VecDeque<QueuedMessage> = messages.into_iter().collect();
        restored.append(&mut self.items);
        let overflow = if restored.len() > self.capacity {
            restored.split_off(self.capacity).into()
        } else {
            Vec::new()
        };
        self.items = restored;
        overflow
    }

    /// Drop everything, returning how many messages were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn strategy(&self) -> DropStrategy {
        self.strategy
    }

    /// Borrow the queued messages in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.items.iter()
    }
}
