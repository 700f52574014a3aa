//! # Jitter Buffer
//!
//! Client-side buffer of confirmed host ticks, released on a playback clock.
//!
//! ## Delays
//!
//! ```text
//!  playback cursor          newest tick end
//!        │◀──── current_delay ────▶│
//! ───────┼─────────┬─────────┬─────┼──── time
//!        │  tick n │ tick n+1│ n+2 │
//! ```
//!
//! The target delay is what the observed arrival jitter needs: mean gap plus
//! `k` standard deviations. The difference between the two drives the
//! playback timescale.

use std::collections::VecDeque;

use crate::error::{NetError, NetResult};
use crate::protocol::TickMessage;

use super::rolling::RollingStandardDeviation;

/// Slack when comparing accumulated playback time with tick boundaries.
const DUE_EPSILON: f64 = 1e-9;

/// Tick-ordered messages released by a playback clock.
#[derive(Clone, Debug)]
pub struct JitterBuffer<T> {
    messages: VecDeque<T>,
    gaps: RollingStandardDeviation,
    last_arrival: Option<f64>,
    newest_tick: i32,
    deviation_factor: f64,
}

impl<T: TickMessage> JitterBuffer<T> {
    /// Creates an empty buffer.
    ///
    /// `window_size` arrival gaps are kept; the target delay is their mean
    /// plus `deviation_factor` standard deviations.
    #[must_use]
    pub fn new(window_size: usize, deviation_factor: f64) -> Self {
        Self {
            messages: VecDeque::new(),
            gaps: RollingStandardDeviation::new(window_size),
            last_arrival: None,
            newest_tick: -1,
            deviation_factor,
        }
    }

    /// Adds a message that arrived at `arrival_time` seconds.
    pub fn insert(&mut self, message: T, arrival_time: f64) {
        if let Some(last) = self.last_arrival {
            self.gaps.insert(arrival_time - last);
        }
        self.last_arrival = Some(arrival_time);

        let tick = message.tick();
        self.newest_tick = self.newest_tick.max(tick);
        let index = self.messages.partition_point(|queued| queued.tick() <= tick);
        self.messages.insert(index, message);
    }

    /// Releases the message for `tick` once the playback clock has passed
    /// the end of that tick.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::SkippedTick`] if the oldest buffered tick is not
    /// `tick`. The buffer never skips ahead on its own.
    pub fn try_pop(&mut self, tick: i32, playback_time: f64, delta_time: f64) -> NetResult<Option<T>> {
        let Some(oldest) = self.oldest_tick() else {
            return Ok(None);
        };
        if oldest != tick {
            return Err(NetError::SkippedTick {
                requested: tick,
                oldest,
            });
        }
        if playback_time + DUE_EPSILON < f64::from(tick + 1) * delta_time {
            return Ok(None);
        }
        Ok(self.messages.pop_front())
    }

    /// Delay the observed jitter calls for, in seconds.
    #[must_use]
    pub fn target_delay(&self) -> f64 {
        self.gaps.mean() + self.deviation_factor * self.gaps.standard_deviation()
    }

    /// Buffered playback time ahead of the cursor, in seconds.
    #[must_use]
    pub fn current_delay(&self, playback_time: f64, delta_time: f64) -> f64 {
        f64::from(self.newest_tick + 1) * delta_time - playback_time
    }

    /// `current_delay - target_delay`; 0 before anything arrived.
    ///
    /// Positive means more is buffered than needed.
    #[must_use]
    pub fn calculate_error(&self, playback_time: f64, delta_time: f64) -> f64 {
        if self.newest_tick < 0 {
            return 0.0;
        }
        self.current_delay(playback_time, delta_time) - self.target_delay()
    }

    /// Tick of the oldest buffered message.
    #[inline]
    #[must_use]
    pub fn oldest_tick(&self) -> Option<i32> {
        self.messages.front().map(TickMessage::tick)
    }

    /// Newest tick ever received; -1 before the first.
    #[inline]
    #[must_use]
    pub const fn newest_tick(&self) -> i32 {
        self.newest_tick
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
