//! Beat-grid geometry and the tolerant numeric configuration it is built
//! from.
//!
//! Tempo inputs usually arrive from host-edited data files, so out-of-range
//! values fall back to documented defaults with a warning instead of
//! failing. The one hard error is a miss window that does not extend past
//! the perfect window, which would make every press score perfect.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Construction-time tuning for a judgment session.
///
/// Fields missing from serialized input take the defaults below; see
/// [`BeatGrid::new`] for how out-of-range values are handled.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Tempo in beats (quarter notes) per minute.
    pub bpm: f64,
    /// Judged subdivisions per bar. 4 judges quarters, 8 eighths.
    pub bar_divisor: f64,
    /// Fixed audio-latency shift applied to every time read, in ms.
    pub offset_ms: f64,
    /// Deviation at or below this scores a perfect 0.0.
    pub perfect_cutoff_ms: f64,
    /// Deviation at or beyond this scores a full miss 1.0.
    pub miss_cutoff_ms: f64,
    /// How many beats ahead of the pending beat a checkout may reach.
    pub checkout_horizon_beats: i64,
    /// Independently phased bar schedulers owned by the judge.
    pub scheduler_count: usize,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            bpm: 150.0,
            bar_divisor: 4.0,
            offset_ms: 0.0,
            perfect_cutoff_ms: 100.0,
            miss_cutoff_ms: 150.0,
            checkout_horizon_beats: 2,
            scheduler_count: 1,
        }
    }
}

/// Rejected grid geometry.
#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("miss cutoff ({miss_ms} ms) must be greater than perfect cutoff ({perfect_ms} ms)")]
    CutoffOrder { perfect_ms: f64, miss_ms: f64 },
}

/// Derived timing geometry, immutable for the life of a session.
///
/// A bar always spans four quarter notes, so `bar_interval_ms` depends only
/// on tempo while `beat_interval_ms` shrinks as the divisor grows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BeatGrid {
    offset_ms: f64,
    beat_interval_ms: f64,
    bar_interval_ms: f64,
    perfect_cutoff_ms: f64,
    miss_cutoff_ms: f64,
    checkout_horizon_beats: i64,
}

impl BeatGrid {
    /// Build a grid from `config`, replacing out-of-range numeric fields
    /// with their defaults. Only a miss cutoff at or below the perfect
    /// cutoff is an error.
    pub fn new(config: &JudgeConfig) -> Result<Self, GridError> {
        let defaults = JudgeConfig::default();
        let bpm = positive_or(config.bpm, defaults.bpm, "bpm");
        let divisor = positive_or(config.bar_divisor, defaults.bar_divisor, "bar_divisor");
        let offset_ms = finite_or(config.offset_ms, defaults.offset_ms, "offset_ms");
        let perfect_cutoff_ms = non_negative_or(
            config.perfect_cutoff_ms,
            defaults.perfect_cutoff_ms,
            "perfect_cutoff_ms",
        );
        let miss_cutoff_ms =
            positive_or(config.miss_cutoff_ms, defaults.miss_cutoff_ms, "miss_cutoff_ms");
        if miss_cutoff_ms <= perfect_cutoff_ms {
            return Err(GridError::CutoffOrder {
                perfect_ms: perfect_cutoff_ms,
                miss_ms: miss_cutoff_ms,
            });
        }

        let bar_interval_ms = 60_000.0 / bpm * 4.0;
        let beat_interval_ms = bar_interval_ms / divisor;
        Ok(Self {
            offset_ms,
            beat_interval_ms,
            bar_interval_ms,
            perfect_cutoff_ms,
            miss_cutoff_ms,
            checkout_horizon_beats: config.checkout_horizon_beats.max(1),
        })
    }

    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }

    /// Spacing of judged beats, `60000 / bpm * 4 / bar_divisor`.
    pub fn beat_interval_ms(&self) -> f64 {
        self.beat_interval_ms
    }

    /// Length of one bar, `60000 / bpm * 4`.
    pub fn bar_interval_ms(&self) -> f64 {
        self.bar_interval_ms
    }

    pub fn perfect_cutoff_ms(&self) -> f64 {
        self.perfect_cutoff_ms
    }

    pub fn miss_cutoff_ms(&self) -> f64 {
        self.miss_cutoff_ms
    }

    /// At least 1, whatever the config said.
    pub fn checkout_horizon_beats(&self) -> i64 {
        self.checkout_horizon_beats
    }
}

fn positive_or(value: f64, fallback: f64, field: &'static str) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        warn!(field, value, fallback, "config value not a positive number, using default");
        fallback
    }
}

fn non_negative_or(value: f64, fallback: f64, field: &'static str) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        warn!(field, value, fallback, "config value negative or not a number, using default");
        fallback
    }
}

fn finite_or(value: f64, fallback: f64, field: &'static str) -> f64 {
    if value.is_finite() {
        value
    } else {
        warn!(field, value, fallback, "config value not finite, using default");
        fallback
    }
}
