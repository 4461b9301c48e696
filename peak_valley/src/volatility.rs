//! Rolling volatility threshold crossings.
//!
//! The safety net of the hybrid detector: cheap, assumption free and unable
//! to fail. The rolling standard deviation of returns is compared with the
//! mean and spread of its own recent history; an upward crossing of
//! `mean + k_sigma * std` marks the bar before the shock.

use log::debug;

use crate::defaults::{DEFAULT_K_SIGMA, DEFAULT_VOLATILITY_WINDOW};
use crate::series::{first_non_finite, log_returns};
use crate::stats::{aggregate, rolling_std};

/// Smallest jump, relative to the trailing mean, that counts as a crossing.
const RELATIVE_MARGIN: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolatilityFallback {
    pub window: usize,
    pub k_sigma: f64,
}

impl Default for VolatilityFallback {
    fn default() -> Self {
        VolatilityFallback {
            window: DEFAULT_VOLATILITY_WINDOW,
            k_sigma: DEFAULT_K_SIGMA,
        }
    }
}

impl VolatilityFallback {
    pub fn detect(&self, values: &[f64]) -> Vec<usize> {
        detect_volatility_shifts(values, self.window, self.k_sigma)
    }
}

/// Indices where the rolling volatility jumps above its trailing band.
///
/// Returns nothing for input too short to fill two windows or containing
/// non-finite values.
pub fn detect_volatility_shifts(values: &[f64], window: usize, k_sigma: f64) -> Vec<usize> {
    let window = window.max(2);
    if values.len() < 2 * window + 2 || first_non_finite(values).is_some() {
        return vec![];
    }

    let returns = log_returns(values);
    let volatility = rolling_std(&returns, window);

    let mut changepoints = vec![];
    let mut above = false;
    for j in 0..volatility.len() {
        let Some(current) = volatility[j] else {
            continue;
        };
        let history: Vec<f64> = volatility[j.saturating_sub(window)..j]
            .iter()
            .flatten()
            .copied()
            .collect();
        if history.len() < 2 {
            continue;
        }
        let band = aggregate(history);
        let margin = (k_sigma * band.stddev).max(RELATIVE_MARGIN * band.mean);
        let crossed = current > band.mean + margin;
        if crossed && !above {
            // Return j moves price j to j + 1
            changepoints.push(j);
        }
        above = crossed;
    }
    debug!(
        "Volatility fallback flagged {} of {} points",
        changepoints.len(),
        values.len()
    );
    changepoints
}
