//! # Playback Clock
//!
//! Decides when confirmed ticks are played and how far the client predicts.
//!
//! ## Two Clocks
//!
//! ```text
//! confirmed_time   virtual playback time, sped up or slowed down by the
//!                  jitter buffer error, releases confirmed ticks
//! predicted_time   how far ahead of the confirmed state local inputs are
//!                  simulated, nudged by the host's timing feedback
//! ```

use tickstep_core::InputRecord;

use crate::buffer::{JitterBuffer, JitterTimescale};
use crate::config::SessionConfig;
use crate::error::NetResult;
use crate::protocol::ServerInputMessage;

/// Jitter-buffered playback of the host's ticks.
#[derive(Clone, Debug)]
pub struct NetworkSimulation<I: InputRecord> {
    buffer: JitterBuffer<ServerInputMessage<I>>,
    timescale: JitterTimescale,
    delta_time: f64,
    confirmed_time: f64,
    predicted_time: f64,
    adjust_interval: f64,
    last_adjustment: f64,
    current_timescale: f64,
}

impl<I: InputRecord> NetworkSimulation<I> {
    /// Creates an empty clock at time 0.
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            buffer: JitterBuffer::new(config.jitter.window_size, config.jitter.deviation_factor),
            timescale: config.timescale,
            delta_time: config.delta_time(),
            confirmed_time: 0.0,
            predicted_time: 0.0,
            adjust_interval: config.prediction.adjust_interval,
            last_adjustment: 0.0,
            current_timescale: 1.0,
        }
    }

    /// Buffers a confirmed tick that arrived at `now`.
    pub fn insert(&mut self, message: ServerInputMessage<I>, now: f64) {
        self.buffer.insert(message, now);
    }

    /// Advances playback by `delta_time` seconds scaled by the buffer error.
    pub fn integrate(&mut self, delta_time: f64) {
        let error = self.error();
        self.current_timescale = self.timescale.timescale(error);
        self.confirmed_time += delta_time * self.current_timescale;
    }

    /// Releases the message for `tick` once playback reached it.
    ///
    /// At most once per adjust interval, the message's timing feedback shifts
    /// the prediction horizon.
    ///
    /// # Errors
    ///
    /// Returns [`crate::NetError::SkippedTick`] if the buffer does not start at
    /// `tick`.
    pub fn try_pop(&mut self, tick: i32, now: f64) -> NetResult<Option<ServerInputMessage<I>>> {
        let message = self.buffer.try_pop(tick, self.confirmed_time, self.delta_time)?;
        if let Some(message) = &message {
            if now > self.last_adjustment + self.adjust_interval {
                let adjusted = (self.predicted_time + f64::from(message.requested_input_timing_delta)).max(0.0);
                tracing::debug!(
                    "Prediction adjusted from {:.4}s to {:.4}s at tick {}",
                    self.predicted_time,
                    adjusted,
                    tick
                );
                self.predicted_time = adjusted;
                self.last_adjustment = now;
            }
        }
        Ok(message)
    }

    /// Ticks to predict past the confirmed state.
    #[must_use]
    pub fn predicted_tick_count(&self) -> i32 {
        #[allow(clippy::cast_possible_truncation)]
        let count = (self.predicted_time / self.delta_time).ceil() as i32;
        count
    }

    /// First tick not yet handed to the jitter buffer; `current` before
    /// anything arrived.
    #[must_use]
    pub const fn next_tick_to_enter(&self, current: i32) -> i32 {
        if self.buffer.newest_tick() >= 0 {
            self.buffer.newest_tick() + 1
        } else {
            current
        }
    }

    /// Moves playback, used when joining a running game.
    pub fn set_confirmed_time(&mut self, time: f64) {
        self.confirmed_time = time;
    }

    /// Virtual playback time in seconds.
    #[inline]
    #[must_use]
    pub const fn confirmed_time(&self) -> f64 {
        self.confirmed_time
    }

    /// Prediction horizon in seconds.
    #[inline]
    #[must_use]
    pub const fn predicted_time(&self) -> f64 {
        self.predicted_time
    }

    /// Confirmed ticks waiting for playback.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Buffered playback time ahead of the cursor.
    #[must_use]
    pub fn current_delay(&self) -> f64 {
        self.buffer.current_delay(self.confirmed_time, self.delta_time)
    }

    /// Delay the observed jitter calls for.
    #[must_use]
    pub fn target_delay(&self) -> f64 {
        self.buffer.target_delay()
    }

    /// `current_delay - target_delay`, 0 before anything arrived.
    #[must_use]
    pub fn error(&self) -> f64 {
        self.buffer.calculate_error(self.confirmed_time, self.delta_time)
    }

    /// Speed applied by the last `integrate`.
    #[inline]
    #[must_use]
    pub const fn timescale(&self) -> f64 {
        self.current_timescale
    }
}
