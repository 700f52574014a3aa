//! # Session Configuration
//!
//! Tuning shared by host and clients, loadable from TOML.
//!
//! ```toml
//! tick_rate = 30
//!
//! [jitter]
//! window_size = 16
//!
//! [latency]
//! min_ms = 20
//! max_ms = 80
//! ```
//!
//! Every field has a default; an empty document is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tickstep_core::DEFAULT_ARENA_BLOCKS;

use crate::buffer::JitterTimescale;
use crate::error::{NetError, NetResult};
use crate::transport::SimulatedLatency;
use crate::DEFAULT_TICK_RATE;

/// Jitter buffer sizing.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct JitterConfig {
    /// Inter-arrival gaps kept for the delay estimate.
    pub window_size: usize,
    /// Standard deviations of headroom on top of the mean gap.
    pub deviation_factor: f64,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            window_size: 32,
            deviation_factor: 2.5,
        }
    }
}

/// Input timing between clients and host.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Minimum seconds between two prediction adjustments on a client.
    pub adjust_interval: f64,
    /// How early (seconds) the host wants client inputs to arrive.
    pub target_input_lead: f64,
    /// Weight of a new sample in the host's smoothed timing error.
    pub error_smoothing: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            adjust_interval: 2.0,
            target_input_lead: 0.01,
            error_smoothing: 0.1,
        }
    }
}

/// Everything a host or client needs to run a session.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Ticks per second.
    pub tick_rate: u32,
    /// Arena size in 8-byte blocks.
    pub arena_blocks: usize,
    /// Jitter buffer sizing.
    pub jitter: JitterConfig,
    /// Playback speed steps.
    pub timescale: JitterTimescale,
    /// Input timing.
    pub prediction: PredictionConfig,
    /// Delay applied by [`crate::transport::LocalTransport`].
    pub latency: Option<SimulatedLatency>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            arena_blocks: DEFAULT_ARENA_BLOCKS,
            jitter: JitterConfig::default(),
            timescale: JitterTimescale::default(),
            prediction: PredictionConfig::default(),
            latency: None,
        }
    }
}

impl SessionConfig {
    /// Fixed step in seconds.
    #[inline]
    #[must_use]
    pub fn delta_time(&self) -> f64 {
        1.0 / f64::from(self.tick_rate)
    }

    /// Rejects values the session cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Config`] naming the offending field.
    pub fn validate(&self) -> NetResult<()> {
        if self.tick_rate == 0 {
            return Err(NetError::Config("tick_rate must be positive".into()));
        }
        if self.arena_blocks == 0 {
            return Err(NetError::Config("arena_blocks must be positive".into()));
        }
        if self.jitter.window_size == 0 {
            return Err(NetError::Config("jitter.window_size must be positive".into()));
        }
        if let Some(latency) = self.latency {
            if latency.min_ms > latency.max_ms {
                return Err(NetError::Config("latency.min_ms exceeds latency.max_ms".into()));
            }
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Config`] for syntax errors or invalid values.
    pub fn from_toml_str(source: &str) -> NetResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| NetError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Io`] if the file cannot be read, otherwise as
    /// [`SessionConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> NetResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }
}
