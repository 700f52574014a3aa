//! # Fixed Step
//!
//! Frame-driven accumulator for the host's tick rate.
//!
//! ## Design
//!
//! The host does not own a clock: the caller passes the frame's elapsed time
//! to [`FixedStep::accumulate`] and then drains whole steps with
//! [`FixedStep::try_step`]. A slow frame produces several steps in a row.
//!
//! ```text
//! accumulate(dt) ──▶ while try_step() { integrate one tick }
//! ```

/// Fixed-timestep accumulator.
#[derive(Clone, Copy, Debug)]
pub struct FixedStep {
    /// Step length in seconds.
    step: f64,
    /// Time not yet consumed by a step.
    accumulator: f64,
    /// Steps taken since the last `accumulate`.
    frame_steps: u32,
    /// Step statistics.
    stats: StepStats,
}

/// Step statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepStats {
    /// Steps taken so far.
    pub total_steps: u64,
    /// Most steps drained in one frame.
    pub max_steps_per_frame: u32,
    /// Frames that needed more than one step.
    pub catch_up_frames: u64,
}

impl FixedStep {
    /// Creates an accumulator for `step` seconds per tick.
    #[must_use]
    pub const fn new(step: f64) -> Self {
        Self {
            step,
            accumulator: 0.0,
            frame_steps: 0,
            stats: StepStats {
                total_steps: 0,
                max_steps_per_frame: 0,
                catch_up_frames: 0,
            },
        }
    }

    /// Starts a frame by adding its elapsed time.
    #[inline]
    pub fn accumulate(&mut self, delta_time: f64) {
        self.accumulator += delta_time;
        self.frame_steps = 0;
    }

    /// Consumes one step if enough time accumulated.
    #[inline]
    #[must_use]
    pub fn try_step(&mut self) -> bool {
        if self.accumulator >= self.step {
            self.accumulator -= self.step;
            self.frame_steps += 1;
            self.stats.total_steps += 1;
            self.stats.max_steps_per_frame = self.stats.max_steps_per_frame.max(self.frame_steps);
            if self.frame_steps == 2 {
                self.stats.catch_up_frames += 1;
            }
            true
        } else {
            false
        }
    }

    /// Seconds left before the next step is due.
    #[inline]
    #[must_use]
    pub fn time_until_next(&self) -> f64 {
        (self.step - self.accumulator).max(0.0)
    }

    /// Step length in seconds.
    #[inline]
    #[must_use]
    pub const fn step(&self) -> f64 {
        self.step
    }

    /// Step statistics.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &StepStats {
        &self.stats
    }

    /// Drops accumulated time, keeping statistics.
    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}
