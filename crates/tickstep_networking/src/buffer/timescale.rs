//! # Jitter Timescale
//!
//! Maps the jitter buffer error to a playback speed.
//!
//! ```text
//!   speed
//!   1.05 ┤                         ┌────────
//!   1.00 ┤          ┌──────────────┘
//!   0.95 ┤    ┌─────┘
//!   0.50 ┼────┘
//!        └────┬─────┬──────────────┬──────── error (s)
//!           -0.1  -0.025         +0.025
//! ```

use serde::{Deserialize, Serialize};

/// Stepped playback-speed function.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct JitterTimescale {
    /// Speed while the buffer holds too much.
    pub fast_forward_timescale: f64,
    /// Speed while the buffer runs thin.
    pub slow_down_timescale: f64,
    /// Speed while the buffer is nearly empty.
    pub stop_timescale: f64,
    /// Error magnitude (seconds) that triggers speeding up or slowing down.
    pub error_threshold: f64,
    /// Negative error magnitude (seconds) that triggers the stop speed.
    pub stop_threshold: f64,
}

impl JitterTimescale {
    /// Playback speed for a buffer error in seconds.
    #[must_use]
    pub fn timescale(&self, error: f64) -> f64 {
        if error > self.error_threshold {
            self.fast_forward_timescale
        } else if error < -self.stop_threshold {
            self.stop_timescale
        } else if error < -self.error_threshold {
            self.slow_down_timescale
        } else {
            1.0
        }
    }
}

impl Default for JitterTimescale {
    fn default() -> Self {
        Self {
            fast_forward_timescale: 1.05,
            slow_down_timescale: 0.95,
            stop_timescale: 0.5,
            error_threshold: 0.025,
            stop_threshold: 0.1,
        }
    }
}
