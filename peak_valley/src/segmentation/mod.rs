//! Offline segmentation of a whole series into piecewise-constant regimes.
//!
//! Two strategies share the [`Segmenter`] capability:
//!
//! - [`ExactSegmenter`]: globally optimal partition by dynamic programming,
//!   either with a fixed number of breakpoints or with a penalty per
//!   breakpoint (PELT).
//! - [`GreedySegmenter`]: bottom-up merging of a fine grid of segments.
//!   Approximate, but close to linear in the series length.
//!
//! Both report the index of the last observation before each regime change.
//! For a price series this is the bar at which the trend turned, which is
//! what the extrema classifier inspects.
//!
//! The penalised variants scale the penalty with the data:
//! `penalty * ln(n) * variance`.

mod bottom_up;
mod cost;
mod exact;

use std::time::{Duration, Instant};

pub use bottom_up::GreedySegmenter;
pub use cost::{CostModel, SegmentCost};
pub use exact::ExactSegmenter;

use crate::error::{DetectionError, Result};

/// When a segmentation stops adding breakpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stopping {
    /// Exactly this many breakpoints
    Count(usize),
    /// Penalty factor per breakpoint, scaled by `ln(n) * variance`
    Penalty(f64),
}

pub trait Segmenter {
    fn name(&self) -> &'static str;

    /// Ascending breakpoint indices into `values`.
    fn detect(&self, values: &[f64]) -> Result<Vec<usize>>;
}

pub(crate) fn scaled_penalty(penalty: f64, n: usize, variance: f64) -> f64 {
    penalty * (n.max(2) as f64).ln() * variance
}

/// Wall-clock limit of one segmentation run.
pub(crate) struct Budget {
    method: &'static str,
    started: Instant,
    limit: Option<Duration>,
}

impl Budget {
    pub(crate) fn start(method: &'static str, limit: Option<Duration>) -> Self {
        Budget {
            method,
            started: Instant::now(),
            limit,
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        match self.limit {
            Some(limit) if self.started.elapsed() >= limit => Err(DetectionError::Timeout {
                method: self.method,
                elapsed_ms: self.started.elapsed().as_millis(),
            }),
            _ => Ok(()),
        }
    }
}

/// Spread below this fraction of the squared mean counts as no spread.
const FLAT_TOLERANCE: f64 = 1e-12;

/// Nothing to segment, relative to the magnitude of the values.
fn is_flat(values: &[f64]) -> bool {
    let stats = crate::stats::aggregate(values.iter().copied());
    stats.stddev.powi(2) <= FLAT_TOLERANCE * stats.mean.powi(2).max(f64::MIN_POSITIVE)
}

fn ensure_finite(values: &[f64]) -> Result<()> {
    match crate::series::first_non_finite(values) {
        Some(index) => Err(DetectionError::NonFiniteInput { index }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_penalty() {
        let expected = 2.0 * 100f64.ln() * 0.5;
        assert!((scaled_penalty(2.0, 100, 0.5) - expected).abs() < 1e-12);
        assert_eq!(scaled_penalty(2.0, 100, 0.0), 0.0);
    }

    #[test]
    fn test_zero_budget_times_out() {
        let budget = Budget::start("test", Some(Duration::ZERO));
        assert!(matches!(
            budget.check(),
            Err(DetectionError::Timeout { method: "test", .. })
        ));
        assert!(Budget::start("test", None).check().is_ok());
    }

    #[test]
    fn test_is_flat_is_relative_to_magnitude() {
        assert!(is_flat(&[0.0; 5]));
        assert!(is_flat(&[123.45; 5]));
        assert!(!is_flat(&[123.45, 123.46]));
        assert!(!is_flat(&[-0.01, 0.01]));
    }

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite(&[1.0, 2.0]).is_ok());
        assert_eq!(
            ensure_finite(&[1.0, f64::NAN]),
            Err(DetectionError::NonFiniteInput { index: 1 })
        );
    }
}
