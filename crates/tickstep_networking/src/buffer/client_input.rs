//! # Client Input Buffer
//!
//! Host-side queue of one client's inputs, plus a measure of how early they
//! arrive.
//!
//! ## Timing
//!
//! ```text
//!  host tick h           h+1              message.tick
//!  ───┼─────────────────┼────────── ... ─────┼──── time
//!     │◀ time_until_next▶│◀─ (tick-h-1)·dt ──▶│
//!     │◀──────────────── lead ───────────────▶│
//! ```
//!
//! The error `target_lead - lead` is sent back to the client: positive asks it
//! to predict further ahead, negative to pull back.

use std::collections::VecDeque;

use tickstep_core::InputRecord;

use super::ordered::OrderedMessageBuffer;
use crate::config::PredictionConfig;
use crate::protocol::ClientInputMessage;

/// One client's inputs waiting to be consumed by host ticks.
#[derive(Clone, Debug)]
pub struct ClientInputBuffer<I: InputRecord> {
    /// Received inputs not yet consecutive with the consume cursor.
    unconsumed: OrderedMessageBuffer<ClientInputMessage<I>>,
    /// Consecutive inputs ready to be consumed, one per host tick.
    ready: VecDeque<ClientInputMessage<I>>,
    /// Tick of the next input to move into `ready`.
    next_tick: i32,
    /// Whether any input was moved into `ready` yet.
    started: bool,
    /// Smoothed timing error in seconds.
    timing_error: f64,
    /// Whether a timing sample was recorded yet.
    has_sample: bool,
    /// How early (seconds) inputs should arrive.
    target_lead: f64,
    /// Weight of a new sample in the smoothed error.
    smoothing: f64,
}

impl<I: InputRecord> ClientInputBuffer<I> {
    /// Creates a buffer that expects its first input for `first_tick`.
    #[must_use]
    pub fn new(first_tick: i32, config: &PredictionConfig) -> Self {
        Self {
            unconsumed: OrderedMessageBuffer::new(),
            ready: VecDeque::new(),
            next_tick: first_tick,
            started: false,
            timing_error: 0.0,
            has_sample: false,
            target_lead: config.target_input_lead,
            smoothing: config.error_smoothing,
        }
    }

    /// Stores an input and records how early it arrived.
    ///
    /// `time_until_next_tick` is the time left before the host integrates
    /// `host_tick`.
    pub fn insert(
        &mut self,
        message: ClientInputMessage<I>,
        host_tick: i32,
        time_until_next_tick: f64,
        delta_time: f64,
    ) {
        let lead = f64::from(message.tick - host_tick) * delta_time + time_until_next_tick;
        let sample = self.target_lead - lead;
        if self.has_sample {
            self.timing_error += self.smoothing * (sample - self.timing_error);
        } else {
            self.timing_error = sample;
            self.has_sample = true;
        }
        self.unconsumed.insert(message);
    }

    /// Takes the next input in tick order, if one is ready.
    ///
    /// Inputs are consumed one per host tick in the order of their ticks,
    /// even when they arrive late. Until the first input is consumed the
    /// cursor follows the oldest arrival: a client only starts sending after
    /// its first confirmed tick.
    pub fn try_pop(&mut self) -> Option<ClientInputMessage<I>> {
        let stale = self.unconsumed.discard_older_than(self.next_tick);
        if stale > 0 {
            tracing::debug!("Dropped {} stale inputs before tick {}", stale, self.next_tick);
        }
        if !self.started {
            if let Some(oldest) = self
                .unconsumed
                .oldest_tick()
                .filter(|&oldest| oldest > self.next_tick)
            {
                tracing::debug!("Input cursor moved from tick {} to first arrival {}", self.next_tick, oldest);
                self.next_tick = oldest;
            }
        }

        while let Some(message) = self.unconsumed.try_dequeue(self.next_tick) {
            self.ready.push_back(message);
            self.next_tick += 1;
            self.started = true;
        }
        self.ready.pop_front()
    }

    /// Smoothed timing error in seconds, as sent back to the client.
    #[inline]
    #[must_use]
    pub const fn timing_error(&self) -> f64 {
        self.timing_error
    }

    /// Inputs held, ready or not.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.unconsumed.len() + self.ready.len()
    }

    /// Returns true if no input is held.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
