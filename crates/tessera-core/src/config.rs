//! Engine configuration
//!
//! The configuration surface is deliberately small: sample rate, block size,
//! queue capacity, the two control-plane tick periods, the telemetry cadence
//! and the late-event policy. Nothing here is persisted by the core; loaders
//! deserialize this struct and hand it to [`Session::start`].
//!
//! [`Session::start`]: crate::session::Session::start

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Time;

/// What to do with a timed event whose target block is already in the past
///
/// The dispatcher can either deliver it at the start of the next block
/// (never drop, at the cost of latency amplification under load) or complete
/// it with `TimedOut` once it is more than one tick stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateEventPolicy {
    /// Deliver late events at the next block with sample offset 0
    #[default]
    SendImmediately,
    /// Complete events older than one dispatcher tick with `TimedOut`
    Drop,
}

/// Configuration for one engine instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Audio sample rate in Hz
    pub sample_rate: f32,
    /// Frames per audio block
    pub block_size: usize,
    /// Entries per RT queue (power of two)
    pub rt_queue_capacity: usize,
    /// Event dispatcher tick period in milliseconds
    pub dispatcher_tick_ms: u64,
    /// Worker tick period in milliseconds
    pub worker_tick_ms: u64,
    /// How often the worker reports engine timing telemetry, in seconds
    pub timing_report_interval_s: u64,
    /// Policy for timed events that miss their block
    pub late_event_policy: LateEventPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            block_size: 64,
            rt_queue_capacity: 1024,
            dispatcher_tick_ms: 1,
            worker_tick_ms: 10,
            timing_report_interval_s: 5,
            late_event_policy: LateEventPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if !self.rt_queue_capacity.is_power_of_two() {
            return Err(ConfigError::QueueCapacityNotPowerOfTwo(self.rt_queue_capacity));
        }
        if self.dispatcher_tick_ms == 0 || self.worker_tick_ms == 0 {
            return Err(ConfigError::ZeroTickPeriod);
        }
        Ok(())
    }

    /// Duration of one audio block at the configured rate
    pub fn block_duration(&self) -> Time {
        Time::from_secs_f64(self.block_size as f64 / self.sample_rate as f64)
    }

    /// Dispatcher tick period
    pub fn dispatcher_tick(&self) -> Duration {
        Duration::from_millis(self.dispatcher_tick_ms)
    }

    /// Worker tick period
    pub fn worker_tick(&self) -> Duration {
        Duration::from_millis(self.worker_tick_ms)
    }

    /// Telemetry report cadence
    pub fn timing_report_interval(&self) -> Duration {
        Duration::from_secs(self.timing_report_interval_s)
    }
}

/// Errors produced by [`EngineConfig::validate`]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Sample rate is zero, negative or not finite
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f32),

    /// Block size of zero frames
    #[error("Block size must be at least one frame")]
    ZeroBlockSize,

    /// RT queue capacity must be a power of two
    #[error("RT queue capacity must be a power of two, got {0}")]
    QueueCapacityNotPowerOfTwo(usize),

    /// Dispatcher and worker periods must be non-zero
    #[error("Tick periods must be non-zero")]
    ZeroTickPeriod,
}
