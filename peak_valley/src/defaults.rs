//! Centralized default values for peak-valley detection.
//!
//! Every tunable used by the detectors has its fallback here. The
//! configuration layer only consults these when neither the command line nor
//! a configuration file provides a value.

// ============================================================================
// Score-Driven Model Defaults
// ============================================================================

/// Default Student-t degrees of freedom.
///
/// Low values make the score update more robust to outliers. Values at or
/// below 2 leave the variance undefined.
pub const DEFAULT_NU: f64 = 4.0;

/// Default intercept of the variance recursion.
pub const DEFAULT_OMEGA: f64 = 0.001;

/// Default reaction of the variance to the scaled score.
pub const DEFAULT_ALPHA: f64 = 0.06;

/// Default persistence of the variance.
///
/// Together with `DEFAULT_ALPHA` this gives `alpha + beta = 0.96 < 1`.
pub const DEFAULT_BETA: f64 = 0.90;

/// Default number of leading observations used to seed the variance.
pub const DEFAULT_WARMUP: usize = 10;

/// Default smoothing factor of the score-driven location.
///
/// Prices are not centred on zero, so the predictive location follows a
/// slow robust moving average of the observations.
pub const DEFAULT_MEAN_SMOOTHING: f64 = 0.05;

/// Lower bound of the model variance.
pub const SIGMA2_FLOOR: f64 = 1e-10;

/// Upper bound of the model variance.
pub const SIGMA2_CEILING: f64 = 1e10;

// ============================================================================
// BOCPD Defaults
// ============================================================================

/// Default prior probability of a changepoint at any step (1/25).
pub const DEFAULT_HAZARD_RATE: f64 = 1.0 / 25.0;

/// Default reset probability above which a changepoint is declared.
pub const DEFAULT_THRESHOLD: f64 = 0.3;

/// Posterior mass below which a run-length hypothesis is discarded.
pub const DEFAULT_PRUNE_THRESHOLD: f64 = 1e-6;

/// Hard cap on the number of live run-length hypotheses.
pub const DEFAULT_MAX_HYPOTHESES: usize = 512;

/// Variance inflation of the predictive used for a freshly started run.
///
/// A factor of 100 widens the standard deviation tenfold.
pub const DEFAULT_PRIOR_SCALE: f64 = 100.0;

/// Minimum collapse of the MAP run length for the `map-drop` rule.
pub const DEFAULT_MIN_DROP: usize = 5;

/// Whether a reset candidate must be confirmed by the next step's MAP run.
pub const DEFAULT_CONFIRM: bool = true;

// ============================================================================
// Offline Segmentation Defaults
// ============================================================================

/// Default number of breakpoints searched by the exact segmenter.
pub const DEFAULT_N_BKPS: usize = 15;

/// Default minimum segment length for the exact segmenter.
pub const DEFAULT_MIN_SIZE: usize = 8;

/// Default minimum segment length for the greedy segmenter on returns.
pub const DEFAULT_GREEDY_MIN_SIZE: usize = 6;

/// Default penalty factor of the greedy segmenter.
///
/// The penalty used internally is `penalty * ln(n) * variance`.
pub const DEFAULT_PENALTY: f64 = 2.0;

/// Longest series the exact segmenter accepts before deferring to greedy.
pub const DEFAULT_EXACT_MAX_LEN: usize = 1500;

/// Wall-clock budget of a single segmentation run in milliseconds.
pub const DEFAULT_TIME_BUDGET_MS: u64 = 10_000;

// ============================================================================
// Volatility Fallback Defaults
// ============================================================================

/// Default rolling window of the volatility estimate.
pub const DEFAULT_VOLATILITY_WINDOW: usize = 8;

/// Default number of standard deviations a volatility jump must exceed.
pub const DEFAULT_K_SIGMA: f64 = 2.0;

// ============================================================================
// Hybrid and Classification Defaults
// ============================================================================

/// Default minimum distance between two reported changepoints.
pub const DEFAULT_MIN_SEPARATION: usize = 3;

/// Default extrema window.
pub const DEFAULT_EXTREMA_WINDOW: usize = 2;

/// Relative tolerance used when comparing prices for equality.
pub const EXTREMA_TOLERANCE: f64 = 1e-9;

// ============================================================================
// Multi-Timeframe Defaults
// ============================================================================

/// Default half-width of the daily local extrema search.
pub const DEFAULT_DAILY_ORDER: usize = 12;

/// Default Average True Range period for intraday filtering.
pub const DEFAULT_ATR_PERIOD: usize = 14;

/// Intraday bars are kept when their ATR exceeds its mean by this factor.
pub const DEFAULT_ATR_MULTIPLIER: f64 = 1.2;

/// Minimum distance between two intraday extrema.
pub const DEFAULT_PEAK_DISTANCE: usize = 6;

// ============================================================================
// Helper Functions
// ============================================================================

/// Shortest series worth running the online detector on.
#[inline]
pub const fn min_series_len(warmup: usize) -> usize {
    2 * warmup
}
