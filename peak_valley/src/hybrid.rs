//! Fusion of the offline, online and fallback detectors.
//!
//! [`HybridChangePointDetector::detect_comprehensive`] walks a fixed chain:
//!
//! 1. The offline strategies in priority order (exact, then greedy). The
//!    first one producing a usable result wins; errors and degenerate
//!    results (no breakpoint, or a breakpoint at every other point) move on
//!    to the next.
//! 2. The online detector always runs. Its changepoints are merged in, but
//!    one within `min_separation` of an offline changepoint is dropped.
//! 3. Only when both statistical sources are empty the volatility fallback
//!    is consulted.
//!
//! The merged points are filtered away from the series ends, separated and
//! returned in ascending order. Only invalid configuration, or every
//! strategy failing, is an error.

use log::{debug, info, warn};

use crate::bocpd::{BocpdConfig, BocpdEngine};
use crate::change_point::{enrich_change_points, ChangePoint, Method};
use crate::defaults::{DEFAULT_EXTREMA_WINDOW, DEFAULT_MIN_SEPARATION};
use crate::error::{DetectionError, Result};
use crate::segmentation::{ExactSegmenter, GreedySegmenter, Segmenter, Stopping};
use crate::series::first_non_finite;
use crate::volatility::VolatilityFallback;

#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub bocpd: BocpdConfig,
    pub exact: ExactSegmenter,
    pub greedy: GreedySegmenter,
    pub volatility: VolatilityFallback,
    /// Smallest distance between two reported changepoints
    pub min_separation: usize,
    /// No changepoint is reported within this many points of either end
    pub boundary_margin: usize,
    /// Reject ill-defined model parameters instead of warning
    pub strict: bool,
}

impl Default for HybridConfig {
    fn default() -> Self {
        HybridConfig {
            bocpd: BocpdConfig::default(),
            exact: ExactSegmenter::default(),
            greedy: GreedySegmenter::default(),
            volatility: VolatilityFallback::default(),
            min_separation: DEFAULT_MIN_SEPARATION,
            boundary_margin: DEFAULT_EXTREMA_WINDOW,
            strict: false,
        }
    }
}

impl HybridConfig {
    pub fn validate(&self) -> Result<()> {
        self.bocpd.validate(self.strict)?;
        validate_stopping("exact", self.exact.stopping)?;
        validate_stopping("greedy", self.greedy.stopping)?;
        if self.exact.min_size == 0 || self.greedy.min_size == 0 {
            return Err(DetectionError::invalid_config(
                "segmentation min_size must be positive",
            ));
        }
        if self.volatility.window < 2 {
            return Err(DetectionError::invalid_config(
                "volatility window needs at least two points",
            ));
        }
        if !(self.volatility.k_sigma.is_finite() && self.volatility.k_sigma >= 0.0) {
            return Err(DetectionError::invalid_config(
                "volatility k_sigma must be a non-negative number",
            ));
        }
        if self.min_separation == 0 {
            return Err(DetectionError::invalid_config(
                "min_separation must be at least 1",
            ));
        }
        Ok(())
    }
}

fn validate_stopping(name: &str, stopping: Stopping) -> Result<()> {
    match stopping {
        Stopping::Penalty(p) if !(p.is_finite() && p >= 0.0) => Err(
            DetectionError::invalid_config(format!("{name} penalty must be a non-negative number")),
        ),
        _ => Ok(()),
    }
}

/// Offline strategies, tried in declaration order.
#[derive(Debug, Clone)]
pub enum OfflineStrategy {
    Exact(ExactSegmenter),
    Greedy(GreedySegmenter),
}

impl OfflineStrategy {
    pub fn method(&self) -> Method {
        match self {
            OfflineStrategy::Exact(_) => Method::Exact,
            OfflineStrategy::Greedy(_) => Method::Greedy,
        }
    }

    fn segmenter(&self) -> &dyn Segmenter {
        match self {
            OfflineStrategy::Exact(s) => s,
            OfflineStrategy::Greedy(s) => s,
        }
    }

    pub fn detect(&self, values: &[f64]) -> Result<Vec<usize>> {
        self.segmenter().detect(values)
    }
}

/// Outcome of the offline chain.
#[derive(Debug, Default)]
struct OfflineOutcome {
    points: Vec<(usize, Method)>,
    failures: Vec<String>,
    attempts: usize,
}

impl OfflineOutcome {
    fn all_failed(&self) -> bool {
        self.attempts > 0 && self.failures.len() == self.attempts
    }
}

#[derive(Debug, Clone)]
pub struct HybridChangePointDetector {
    config: HybridConfig,
    engine: BocpdEngine,
}

impl Default for HybridChangePointDetector {
    fn default() -> Self {
        let config = HybridConfig::default();
        HybridChangePointDetector {
            engine: BocpdEngine::from_validated(config.bocpd.clone()),
            config,
        }
    }
}

impl HybridChangePointDetector {
    pub fn new(config: HybridConfig) -> Result<Self> {
        config.validate()?;
        Ok(HybridChangePointDetector {
            engine: BocpdEngine::from_validated(config.bocpd.clone()),
            config,
        })
    }

    pub fn config(&self) -> &HybridConfig {
        &self.config
    }

    pub fn engine(&self) -> &BocpdEngine {
        &self.engine
    }

    pub fn strategies(&self) -> [OfflineStrategy; 2] {
        [
            OfflineStrategy::Exact(self.config.exact.clone()),
            OfflineStrategy::Greedy(self.config.greedy.clone()),
        ]
    }

    /// Ascending indices of the merged changepoints.
    pub fn detect_indices(&self, values: &[f64]) -> Result<Vec<usize>> {
        Ok(self
            .detect_comprehensive(values)?
            .into_iter()
            .map(|cp| cp.index)
            .collect())
    }

    /// Run every detector and merge their results.
    ///
    /// Short series and series with non-finite values yield no changepoints.
    pub fn detect_comprehensive(&self, values: &[f64]) -> Result<Vec<ChangePoint>> {
        let n = values.len();
        let min_len = self.config.bocpd.min_len();
        if n < min_len {
            debug!("Series of {n} points is shorter than {min_len}, nothing to detect");
            return Ok(vec![]);
        }
        if let Some(index) = first_non_finite(values) {
            warn!("Non-finite value at index {index}, skipping detection");
            return Ok(vec![]);
        }

        let offline = self.run_offline(values)?;

        // The engine reports the first point of a new run
        let online: Vec<usize> = self
            .engine
            .detect(values)
            .into_iter()
            .filter_map(|t| t.checked_sub(1))
            .collect();
        info!(
            "Offline detection kept {} changepoints, online detection found {}",
            offline.points.len(),
            online.len()
        );

        let mut points = offline.points.clone();
        points.extend(online.iter().map(|&index| (index, Method::Online)));

        if points.is_empty() {
            let fallback = self.config.volatility.detect(values);
            info!(
                "No statistical changepoints, volatility fallback found {}",
                fallback.len()
            );
            if fallback.is_empty() && offline.all_failed() {
                return Err(DetectionError::AllStrategiesFailed(offline.failures));
            }
            points.extend(fallback.into_iter().map(|index| (index, Method::Volatility)));
        }

        let merged = merge_points(
            points,
            n,
            self.config.min_separation,
            self.config.boundary_margin,
        );
        Ok(enrich_change_points(&merged, values))
    }

    fn run_offline(&self, values: &[f64]) -> Result<OfflineOutcome> {
        let n = values.len();
        let mut outcome = OfflineOutcome::default();
        for strategy in self.strategies() {
            let method = strategy.method();
            outcome.attempts += 1;
            match strategy.detect(values) {
                Ok(points) if is_degenerate(&points, n) => {
                    debug!(
                        "{} segmentation gave a degenerate result ({} breakpoints), trying next",
                        method.as_str(),
                        points.len()
                    );
                }
                Ok(points) => {
                    debug!(
                        "Using {} segmentation with {} breakpoints",
                        method.as_str(),
                        points.len()
                    );
                    outcome.points = points.into_iter().map(|i| (i, method)).collect();
                    return Ok(outcome);
                }
                Err(e) if e.is_recoverable() => {
                    info!("{} segmentation failed: {e}", method.as_str());
                    outcome.failures.push(format!("{}: {e}", method.as_str()));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }
}

fn is_degenerate(points: &[usize], n: usize) -> bool {
    points.is_empty() || points.len() * 2 >= n
}

/// Filter the series ends, enforce the separation and sort.
///
/// Points are accepted in source priority (exact, greedy, online,
/// volatility), earliest first within a source, so a lower priority point
/// never displaces a higher priority one.
fn merge_points(
    mut points: Vec<(usize, Method)>,
    n: usize,
    min_separation: usize,
    margin: usize,
) -> Vec<(usize, Method)> {
    points.retain(|&(index, _)| index >= margin && index + margin.max(1) < n);
    points.sort_unstable_by_key(|&(index, method)| (method, index));

    let mut kept: Vec<(usize, Method)> = Vec::with_capacity(points.len());
    for (index, method) in points {
        if kept
            .iter()
            .all(|&(other, _)| other.abs_diff(index) >= min_separation)
        {
            kept.push((index, method));
        } else {
            debug!("Dropping {} changepoint at {index}", method.as_str());
        }
    }
    kept.sort_unstable();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_point::ChangeDirection;
    use crate::test_helpers::step_series;
    use peak_valley_cli_types::DetectionRule;
    use std::time::Duration;

    fn calm_then_wild(calm: usize, wild: usize) -> Vec<f64> {
        let mut prices = vec![100.0];
        for i in 0..calm + wild {
            let size = if i < calm { 0.002 } else { 0.05 };
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            let last = prices[prices.len() - 1];
            prices.push(last * (1.0 + sign * size));
        }
        prices
    }

    fn quiet_online() -> BocpdConfig {
        BocpdConfig {
            rule: DetectionRule::MapDrop,
            min_drop: usize::MAX,
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_prefers_offline_points() {
        let points = vec![
            (10, Method::Exact),
            (30, Method::Exact),
            (12, Method::Online),
            (20, Method::Online),
            (31, Method::Online),
        ];
        assert_eq!(
            merge_points(points, 50, 3, 2),
            vec![(10, Method::Exact), (20, Method::Online), (30, Method::Exact)]
        );
    }

    #[test]
    fn test_merge_filters_boundaries_and_duplicates() {
        let points = vec![
            (1, Method::Greedy),
            (20, Method::Online),
            (20, Method::Volatility),
            (48, Method::Greedy),
            (49, Method::Online),
        ];
        assert_eq!(merge_points(points, 50, 3, 2), vec![(20, Method::Online)]);
    }

    #[test]
    fn test_degenerate_results() {
        assert!(is_degenerate(&[], 100));
        assert!(is_degenerate(&(0..50).collect::<Vec<_>>(), 100));
        assert!(!is_degenerate(&[10, 20], 100));
    }

    #[test]
    fn test_short_and_non_finite_series_are_empty() {
        let detector = HybridChangePointDetector::default();
        assert!(detector.detect_comprehensive(&[1.0; 19]).unwrap().is_empty());
        let mut values = calm_then_wild(40, 20);
        values[7] = f64::NAN;
        assert!(detector.detect_comprehensive(&values).unwrap().is_empty());
    }

    #[test]
    fn test_exact_result_wins_over_online() {
        let values: Vec<f64> = (0..160)
            .map(|i| {
                let wiggle = 0.05 * ((i * 7 % 11) as f64 - 5.0);
                if i < 80 {
                    100.0 + wiggle
                } else {
                    130.0 + wiggle
                }
            })
            .collect();
        let cps = HybridChangePointDetector::default()
            .detect_comprehensive(&values)
            .unwrap();
        let shift = cps.iter().find(|cp| cp.index.abs_diff(79) < 3).unwrap();
        assert_eq!(shift.index, 79);
        assert_eq!(shift.source, Method::Exact);
        assert!(cps.windows(2).all(|w| w[1].index >= w[0].index + 3));
    }

    #[test]
    fn test_noisy_regimes_are_located() {
        let values = step_series(&[(60, 100.0), (60, 120.0), (60, 90.0)], 0.5, 11);
        let cps = HybridChangePointDetector::default()
            .detect_comprehensive(&values)
            .unwrap();
        let up = cps.iter().find(|cp| cp.index == 59).unwrap();
        assert_eq!(up.source, Method::Exact);
        assert_eq!(up.direction, ChangeDirection::Increase);
        let down = cps.iter().find(|cp| cp.index == 119).unwrap();
        assert_eq!(down.source, Method::Exact);
        assert_eq!(down.direction, ChangeDirection::Decrease);
    }

    #[test]
    fn test_greedy_takes_over_when_exact_cannot_run() {
        let mut prices = vec![100.0];
        for i in 0..60 {
            let last = prices[prices.len() - 1];
            let step = if i < 30 { 1.01 } else { 0.99 };
            let wiggle = if i % 2 == 0 { 1.002 } else { 0.998 };
            prices.push(last * step * wiggle);
        }
        let cps = HybridChangePointDetector::default()
            .detect_comprehensive(&prices)
            .unwrap();
        assert!(cps
            .iter()
            .any(|cp| cp.index == 30 && cp.source == Method::Greedy));
        assert!(cps.iter().all(|cp| cp.source != Method::Exact));
    }

    #[test]
    fn test_volatility_fallback_when_nothing_else_fires() {
        let config = HybridConfig {
            bocpd: quiet_online(),
            ..Default::default()
        };
        let detector = HybridChangePointDetector::new(config).unwrap();
        let cps = detector
            .detect_comprehensive(&calm_then_wild(40, 20))
            .unwrap();
        assert_eq!(cps.len(), 1);
        assert_eq!(cps[0].index, 40);
        assert_eq!(cps[0].source, Method::Volatility);
    }

    #[test]
    fn test_all_strategies_failing_is_reported() {
        let config = HybridConfig {
            bocpd: quiet_online(),
            greedy: GreedySegmenter {
                time_budget: Some(Duration::ZERO),
                ..Default::default()
            },
            ..Default::default()
        };
        let detector = HybridChangePointDetector::new(config).unwrap();
        match detector.detect_comprehensive(&calm_then_wild(60, 0)) {
            Err(DetectionError::AllStrategiesFailed(reasons)) => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons[0].starts_with("exact"));
                assert!(reasons[1].starts_with("greedy"));
            }
            other => panic!("expected aggregated failure, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = HybridConfig {
            min_separation: 0,
            ..Default::default()
        };
        assert!(matches!(
            HybridChangePointDetector::new(config),
            Err(DetectionError::InvalidConfig(_))
        ));

        let mut config = HybridConfig {
            strict: true,
            ..Default::default()
        };
        config.bocpd.gas.beta = 0.95;
        assert!(matches!(
            HybridChangePointDetector::new(config.clone()),
            Err(DetectionError::InvalidConfig(_))
        ));
        config.strict = false;
        assert!(HybridChangePointDetector::new(config).is_ok());
    }

    #[test]
    fn test_detection_is_repeatable() {
        let values = calm_then_wild(40, 30);
        let detector = HybridChangePointDetector::default();
        assert_eq!(
            detector.detect_comprehensive(&values).unwrap(),
            detector.detect_comprehensive(&values).unwrap()
        );
    }
}
