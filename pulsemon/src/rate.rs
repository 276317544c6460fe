//! Turning cumulative kernel counters into rates, and capacity figures into usage.

use serde::Serialize;
use std::time::Instant;

/// One reading of a monotonically increasing counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSample {
    pub value: u64,
    pub at: Instant,
}

impl CounterSample {
    pub fn new(value: u64, at: Instant) -> Self {
        Self { value, at }
    }

    /// Units per second between `prev` and `self`.
    ///
    /// `None` when no time has passed or the counter went backwards (wrap, reset,
    /// replaced device); that is "no rate this tick", not an error.
    pub fn rate_since(&self, prev: &CounterSample) -> Option<f64> {
        per_second(prev.value, self.value, elapsed_secs(prev.at, self.at)?)
    }
}

/// Seconds from `earlier` to `later`, or `None` unless strictly positive.
pub fn elapsed_secs(earlier: Instant, later: Instant) -> Option<f64> {
    let secs = later.checked_duration_since(earlier)?.as_secs_f64();
    (secs > 0.0).then_some(secs)
}

pub fn per_second(old: u64, new: u64, elapsed_secs: f64) -> Option<f64> {
    if !elapsed_secs.is_finite() || elapsed_secs <= 0.0 {
        return None;
    }
    let delta = new.checked_sub(old)?;
    Some(delta as f64 / elapsed_secs)
}

pub fn clamp_percent(v: f64) -> f64 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(0.0, 100.0)
}

/// Capacity of a memory pool or filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsageMetric {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub used_percent: f64,
}

impl UsageMetric {
    pub fn from_total_free(total_bytes: u64, free_bytes: u64) -> Self {
        let used_bytes = total_bytes.saturating_sub(free_bytes);
        let used_percent = if total_bytes > 0 {
            clamp_percent(used_bytes as f64 / total_bytes as f64 * 100.0)
        } else {
            0.0
        };
        Self {
            total_bytes,
            used_bytes,
            free_bytes,
            used_percent,
        }
    }
}
