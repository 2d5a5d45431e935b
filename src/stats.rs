// ─────────────────────────────────────────────────────────────────────────────
// stats.rs — Rolling time-series history and z-scores
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::VecDeque;

use crate::config::ZSCORE_MIN_SAMPLES;

/// Current wall-clock time as seconds since the epoch.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1_000.0
}

/// A bounded (timestamp, value) series. Samples are appended in arrival
/// order and trimmed on append, so the deque always spans at most
/// `window_secs` and timestamps are monotone non-decreasing as long as
/// callers append with a non-decreasing clock.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    window_secs: f64,
    samples: VecDeque<(f64, f64)>,
}

impl RollingHistory {
    pub fn new(window_secs: f64) -> Self {
        Self {
            window_secs,
            samples: VecDeque::new(),
        }
    }

    pub fn push(&mut self, ts: f64, value: f64) {
        self.samples.push_back((ts, value));
        let cutoff = ts - self.window_secs;
        while let Some(&(front_ts, _)) = self.samples.front() {
            if front_ts >= cutoff {
                break;
            }
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|&(_, v)| v)
    }

    /// Standard-normal score of `value` against the retained samples.
    /// Returns 0.0 when the history is too thin to be meaningful
    /// (fewer than ZSCORE_MIN_SAMPLES) or when the population stddev is 0.
    pub fn z_score(&self, value: f64) -> f64 {
        if self.samples.len() < ZSCORE_MIN_SAMPLES {
            return 0.0;
        }
        let count = self.samples.len() as f64;
        let mean = self.values().sum::<f64>() / count;
        let variance = self.values().map(|v| (v - mean) * (v - mean)).sum::<f64>() / count;
        let std_dev = variance.sqrt();
        if std_dev <= 0.0 {
            return 0.0;
        }
        (value - mean) / std_dev
    }
}
