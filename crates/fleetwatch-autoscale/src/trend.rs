//! Trend estimation: exponential smoothing weighted by elapsed time.
//!
//! ```text
//! alpha = clamp(elapsed_minutes * 0.3, 0, 1)
//! ema'  = alpha * load + (1 - alpha) * ema_prev
//! trend = 2 * ema' - ema_prev
//! ```
//!
//! Deriving alpha from wall-clock time keeps the smoothing sane when an
//! invocation is delayed or skipped.

/// Smoothing weight gained per elapsed minute.
const ALPHA_PER_MINUTE: f64 = 0.3;

/// Smoothed load and its first-order extrapolation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendEstimate {
    pub alpha: f64,
    pub exponential_average: f64,
    pub trend: f64,
}

pub struct TrendEstimator;

impl TrendEstimator {
    /// Smoothing weight for `elapsed_secs` between runs.
    pub fn alpha(elapsed_secs: f64) -> f64 {
        (elapsed_secs / 60.0 * ALPHA_PER_MINUTE).clamp(0.0, 1.0)
    }

    /// Fold the current aggregate load into the previous average.
    ///
    /// A clock that went backwards counts as zero elapsed time.
    pub fn estimate(aggregate_load: f64, now: u64, prev_ts: u64, prev_average: f64) -> TrendEstimate {
        let elapsed = now.saturating_sub(prev_ts) as f64;
        let alpha = Self::alpha(elapsed);
        let exponential_average = alpha * aggregate_load + (1.0 - alpha) * prev_average;
        TrendEstimate {
            alpha,
            exponential_average,
            trend: 2.0 * exponential_average - prev_average,
        }
    }
}
