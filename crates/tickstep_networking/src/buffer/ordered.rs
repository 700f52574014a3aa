//! # Ordered Message Buffer
//!
//! Tick-sorted staging area for messages that may arrive out of order.

use std::collections::VecDeque;

use crate::protocol::TickMessage;

/// Messages sorted by tick, oldest first.
#[derive(Clone, Debug)]
pub struct OrderedMessageBuffer<T> {
    messages: VecDeque<T>,
}

impl<T: TickMessage> OrderedMessageBuffer<T> {
    /// Creates an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: VecDeque::new(),
        }
    }

    /// Inserts a message at its tick position. Equal ticks keep arrival order.
    pub fn insert(&mut self, message: T) {
        let tick = message.tick();
        let index = self.messages.partition_point(|queued| queued.tick() <= tick);
        self.messages.insert(index, message);
    }

    /// Removes the oldest message if it belongs to `target_tick`.
    pub fn try_dequeue(&mut self, target_tick: i32) -> Option<T> {
        if self.oldest_tick()? == target_tick {
            self.messages.pop_front()
        } else {
            None
        }
    }

    /// Drops every message older than `tick` and returns how many were dropped.
    pub fn discard_older_than(&mut self, tick: i32) -> usize {
        let stale = self.messages.partition_point(|queued| queued.tick() < tick);
        self.messages.drain(..stale);
        stale
    }

    /// Tick of the oldest message.
    #[inline]
    #[must_use]
    pub fn oldest_tick(&self) -> Option<i32> {
        self.messages.front().map(TickMessage::tick)
    }

    /// Number of buffered messages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if nothing is buffered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl<T: TickMessage> Default for OrderedMessageBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
