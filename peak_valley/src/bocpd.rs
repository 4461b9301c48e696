//! Bayesian online changepoint detection driven by the score-driven model.
//!
//! Every run-length hypothesis carries its own [`ScoreDrivenModel`], so the
//! predictive of a long run reflects the volatility learnt over that run
//! while a young run starts from the warm-up scale. The changepoint branch
//! is weighted by a broad prior predictive centred on the previous
//! observation:
//!
//! ```text
//! grow(r + 1) = p(r) * pred_r(x_t) * (1 - h)
//! reset(0)    = sum_r p(r) * prior(x_t) * h
//! ```
//!
//! All mass is kept in log space and normalised with log-sum-exp after each
//! step.

use itertools::Itertools;
use log::{debug, trace};
use peak_valley_cli_types::DetectionRule;

use crate::defaults::{
    min_series_len, DEFAULT_CONFIRM, DEFAULT_HAZARD_RATE, DEFAULT_MAX_HYPOTHESES,
    DEFAULT_MIN_DROP, DEFAULT_PRIOR_SCALE, DEFAULT_PRUNE_THRESHOLD, DEFAULT_THRESHOLD,
    DEFAULT_WARMUP,
};
use crate::error::{DetectionError, Result};
use crate::gas::{GasParams, ScoreDrivenModel};
use crate::series::first_non_finite;

#[derive(Debug, Clone, PartialEq)]
pub struct BocpdConfig {
    pub gas: GasParams,
    pub hazard_rate: f64,
    pub threshold: f64,
    pub warmup: usize,
    pub prune_threshold: f64,
    pub max_hypotheses: usize,
    /// Variance inflation of the predictive of a new run
    pub prior_scale: f64,
    pub rule: DetectionRule,
    /// Keep a reset candidate only if its run is the MAP one step later
    pub confirm: bool,
    pub min_drop: usize,
}

impl Default for BocpdConfig {
    fn default() -> Self {
        BocpdConfig {
            gas: GasParams::default(),
            hazard_rate: DEFAULT_HAZARD_RATE,
            threshold: DEFAULT_THRESHOLD,
            warmup: DEFAULT_WARMUP,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            max_hypotheses: DEFAULT_MAX_HYPOTHESES,
            prior_scale: DEFAULT_PRIOR_SCALE,
            rule: DetectionRule::ResetProbability,
            confirm: DEFAULT_CONFIRM,
            min_drop: DEFAULT_MIN_DROP,
        }
    }
}

impl BocpdConfig {
    pub fn validate(&self, strict: bool) -> Result<()> {
        self.gas.validate(strict)?;
        if !(self.hazard_rate > 0.0 && self.hazard_rate < 1.0) {
            return Err(DetectionError::invalid_config(format!(
                "hazard_rate must lie in (0, 1), got {}",
                self.hazard_rate
            )));
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(DetectionError::invalid_config(format!(
                "threshold must lie in (0, 1), got {}",
                self.threshold
            )));
        }
        if !(self.prune_threshold >= 0.0 && self.prune_threshold < 1.0) {
            return Err(DetectionError::invalid_config(
                "prune_threshold must lie in [0, 1)",
            ));
        }
        if self.max_hypotheses < 2 {
            return Err(DetectionError::invalid_config(
                "max_hypotheses must keep at least two runs",
            ));
        }
        if !(self.prior_scale.is_finite() && self.prior_scale >= 1.0) {
            return Err(DetectionError::invalid_config(
                "prior_scale must be at least 1",
            ));
        }
        Ok(())
    }

    /// Shortest series the engine analyses.
    pub fn min_len(&self) -> usize {
        min_series_len(self.warmup).max(2)
    }
}

#[derive(Debug, Clone)]
struct RunHypothesis {
    run_length: usize,
    log_prob: f64,
    model: ScoreDrivenModel,
    last_score: f64,
}

/// Summary of the posterior after one update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PosteriorStep {
    pub reset_probability: f64,
    pub map_run_length: usize,
    /// Scale of the MAP hypothesis after the update
    pub sigma2: f64,
    /// Score the MAP hypothesis saw for the current observation
    pub score: f64,
}

/// Run-length distribution over the hypotheses alive at the current step.
///
/// Hypotheses are stored oldest first; a new run is appended at the end and
/// pruning removes entries in place.
#[derive(Debug, Clone)]
pub struct RunLengthPosterior {
    hypotheses: Vec<RunHypothesis>,
    params: GasParams,
    sigma2_0: f64,
    log_hazard: f64,
    log_survival: f64,
    prune_threshold: f64,
    max_hypotheses: usize,
    prior_scale: f64,
}

impl RunLengthPosterior {
    /// Point mass on run length zero, held by `model`.
    pub fn new(model: ScoreDrivenModel, config: &BocpdConfig) -> Self {
        RunLengthPosterior {
            params: *model.params(),
            sigma2_0: model.sigma2(),
            hypotheses: vec![RunHypothesis {
                run_length: 0,
                log_prob: 0.0,
                model,
                last_score: 0.0,
            }],
            log_hazard: config.hazard_rate.ln(),
            log_survival: (1.0 - config.hazard_rate).ln(),
            prune_threshold: config.prune_threshold,
            max_hypotheses: config.max_hypotheses,
            prior_scale: config.prior_scale,
        }
    }

    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    /// `(run_length, probability)` pairs, oldest run first.
    pub fn probabilities(&self) -> Vec<(usize, f64)> {
        self.hypotheses
            .iter()
            .map(|h| (h.run_length, h.log_prob.exp()))
            .collect()
    }

    pub fn total_mass(&self) -> f64 {
        self.hypotheses.iter().map(|h| h.log_prob.exp()).sum()
    }

    pub fn reset_probability(&self) -> f64 {
        self.hypotheses
            .iter()
            .find(|h| h.run_length == 0)
            .map_or(0.0, |h| h.log_prob.exp())
    }

    pub fn map_run_length(&self) -> usize {
        self.map().map_or(0, |h| h.run_length)
    }

    fn map(&self) -> Option<&RunHypothesis> {
        self.hypotheses
            .iter()
            .max_by(|a, b| a.log_prob.total_cmp(&b.log_prob))
    }

    /// Absorb observation `x`; `previous` centres the prior of a new run.
    pub fn update(&mut self, x: f64, previous: f64) -> PosteriorStep {
        let log_prior_mass = log_sum_exp(self.hypotheses.iter().map(|h| h.log_prob));
        let prior = ScoreDrivenModel::new(
            self.params,
            previous,
            self.sigma2_0 * self.prior_scale,
        );
        let reset_log_prob = log_prior_mass + self.log_hazard + prior.predictive_log_density(x);

        for hypothesis in &mut self.hypotheses {
            let out = hypothesis.model.step(x);
            hypothesis.log_prob += out.log_density + self.log_survival;
            hypothesis.run_length += 1;
            hypothesis.last_score = out.score;
        }
        self.hypotheses.push(RunHypothesis {
            run_length: 0,
            log_prob: reset_log_prob,
            model: ScoreDrivenModel::new(self.params, x, self.sigma2_0),
            last_score: 0.0,
        });

        if !self.normalize() {
            debug!("Run-length posterior degenerated, restarting from a fresh run");
            self.restart(x);
        }
        self.prune();

        let map = self.map();
        PosteriorStep {
            reset_probability: self.reset_probability(),
            map_run_length: map.map_or(0, |h| h.run_length),
            sigma2: map.map_or(self.sigma2_0, |h| h.model.sigma2()),
            score: map.map_or(0.0, |h| h.last_score),
        }
    }

    fn normalize(&mut self) -> bool {
        let normalizer = log_sum_exp(self.hypotheses.iter().map(|h| h.log_prob));
        if !normalizer.is_finite() {
            return false;
        }
        for hypothesis in &mut self.hypotheses {
            hypothesis.log_prob -= normalizer;
        }
        true
    }

    fn restart(&mut self, x: f64) {
        self.hypotheses.clear();
        self.hypotheses.push(RunHypothesis {
            run_length: 0,
            log_prob: 0.0,
            model: ScoreDrivenModel::new(self.params, x, self.sigma2_0),
            last_score: 0.0,
        });
    }

    fn prune(&mut self) {
        let before = self.hypotheses.len();
        let Some(best) = self.map().map(|h| h.log_prob) else {
            return;
        };
        let cutoff = self.prune_threshold.ln();
        self.hypotheses
            .retain(|h| h.log_prob >= cutoff || h.log_prob == best);

        let cap = self.max_hypotheses;
        if self.hypotheses.len() > cap {
            let mut by_mass: Vec<f64> = self.hypotheses.iter().map(|h| h.log_prob).collect();
            by_mass.sort_by(|a, b| b.total_cmp(a));
            let floor = by_mass[cap - 1];
            let mut kept = 0;
            self.hypotheses.retain(|h| {
                let keep = h.log_prob >= floor && kept < cap;
                kept += usize::from(keep);
                keep
            });
        }

        if self.hypotheses.len() != before {
            trace!(
                "Pruned {} of {} run-length hypotheses",
                before - self.hypotheses.len(),
                before
            );
            // Renormalising a non-empty set that contains the MAP cannot fail
            self.normalize();
        }
    }
}

/// One row of the per-step diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct TraceStep {
    pub index: usize,
    pub reset_probability: f64,
    pub map_run_length: usize,
    pub sigma2: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BocpdRun {
    pub changepoints: Vec<usize>,
    pub trace: Vec<TraceStep>,
}

/// Stateless between calls; each detection builds its own posterior.
#[derive(Debug, Clone, Default)]
pub struct BocpdEngine {
    config: BocpdConfig,
}

impl BocpdEngine {
    pub fn new(config: BocpdConfig) -> Result<Self> {
        config.validate(false)?;
        Ok(BocpdEngine { config })
    }

    pub(crate) fn from_validated(config: BocpdConfig) -> Self {
        BocpdEngine { config }
    }

    pub fn config(&self) -> &BocpdConfig {
        &self.config
    }

    pub fn detect(&self, values: &[f64]) -> Vec<usize> {
        self.run_with_trace(values).changepoints
    }

    /// Detect changepoints and keep the per-step posterior summary.
    ///
    /// Series shorter than twice the warm-up window or containing non-finite
    /// values yield an empty run.
    pub fn run_with_trace(&self, values: &[f64]) -> BocpdRun {
        let config = &self.config;
        let n = values.len();
        if n < config.min_len() {
            debug!(
                "Skipping online detection: {} points, need {}",
                n,
                config.min_len()
            );
            return BocpdRun::default();
        }
        if let Some(index) = first_non_finite(values) {
            debug!("Skipping online detection: non-finite value at {index}");
            return BocpdRun::default();
        }

        let warmup = config.warmup.clamp(1, n);
        let model = ScoreDrivenModel::from_warmup(config.gas, &values[..warmup]);
        let mut posterior = RunLengthPosterior::new(model, config);

        let mut trace = Vec::with_capacity(n);
        trace.push(TraceStep {
            index: 0,
            reset_probability: 1.0,
            map_run_length: 0,
            sigma2: posterior.sigma2_0,
            score: 0.0,
        });
        for t in 1..n {
            let step = posterior.update(values[t], values[t - 1]);
            trace.push(TraceStep {
                index: t,
                reset_probability: step.reset_probability,
                map_run_length: step.map_run_length,
                sigma2: step.sigma2,
                score: step.score,
            });
        }

        let changepoints = match config.rule {
            DetectionRule::ResetProbability => self.reset_changepoints(&trace),
            DetectionRule::MapDrop => self.map_drop_changepoints(&trace),
        };
        debug!(
            "Online detection found {} changepoints in {} points",
            changepoints.len(),
            n
        );
        BocpdRun {
            changepoints,
            trace,
        }
    }

    fn reset_changepoints(&self, trace: &[TraceStep]) -> Vec<usize> {
        let config = &self.config;
        trace
            .iter()
            .filter(|step| step.index >= config.warmup)
            .filter(|step| step.reset_probability > config.threshold)
            .filter(|step| {
                !config.confirm
                    || trace
                        .get(step.index + 1)
                        .is_some_and(|next| next.map_run_length == 1)
            })
            .map(|step| step.index)
            .collect()
    }

    fn map_drop_changepoints(&self, trace: &[TraceStep]) -> Vec<usize> {
        let config = &self.config;
        let mut changepoints: Vec<usize> = vec![];
        for (prev, step) in trace.iter().tuple_windows() {
            let collapsed = step.map_run_length * 2 <= prev.map_run_length
                && prev.map_run_length - step.map_run_length >= config.min_drop;
            // The new run has to survive one more step
            let persists = !config.confirm
                || trace
                    .get(step.index + 1)
                    .is_some_and(|next| next.map_run_length == step.map_run_length + 1);
            if !collapsed || !persists {
                continue;
            }
            let start = step.index - step.map_run_length;
            if start >= config.warmup && changepoints.last() != Some(&start) {
                changepoints.push(start);
            }
        }
        changepoints
    }
}

pub(crate) fn log_sum_exp(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.map(|v| (v - max).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn level_shift(n: usize, at: usize, jump: f64) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let wiggle = 0.05 * ((i * 7 % 11) as f64 - 5.0);
                if i < at {
                    10.0 + wiggle
                } else {
                    10.0 + jump + wiggle
                }
            })
            .collect()
    }

    #[test]
    fn test_log_sum_exp() {
        let values = [0.5f64.ln(), 0.25f64.ln(), 0.25f64.ln()];
        assert_relative_eq!(log_sum_exp(values.iter().copied()), 0.0, epsilon = 1e-12);
        assert_eq!(
            log_sum_exp([f64::NEG_INFINITY].iter().copied()),
            f64::NEG_INFINITY
        );
        // No overflow for large magnitudes
        assert_relative_eq!(
            log_sum_exp([1000.0, 1000.0].iter().copied()),
            1000.0 + 2f64.ln()
        );
    }

    #[test]
    fn test_posterior_starts_as_point_mass() {
        let config = BocpdConfig::default();
        let model = ScoreDrivenModel::new(config.gas, 0.0, 1.0);
        let posterior = RunLengthPosterior::new(model, &config);
        assert_eq!(posterior.probabilities(), vec![(0, 1.0)]);
        assert_eq!(posterior.map_run_length(), 0);
    }

    #[test]
    fn test_posterior_mass_is_normalised() {
        let config = BocpdConfig::default();
        let values = level_shift(120, 60, 3.0);
        let model = ScoreDrivenModel::from_warmup(config.gas, &values[..10]);
        let mut posterior = RunLengthPosterior::new(model, &config);
        for t in 1..values.len() {
            posterior.update(values[t], values[t - 1]);
            assert_relative_eq!(posterior.total_mass(), 1.0, epsilon = 1e-6);
            assert!(posterior.len() <= config.max_hypotheses);
        }
    }

    #[test]
    fn test_hypothesis_cap_is_enforced() {
        let config = BocpdConfig {
            prune_threshold: 0.0,
            max_hypotheses: 8,
            ..Default::default()
        };
        let model = ScoreDrivenModel::new(config.gas, 0.0, 1.0);
        let mut posterior = RunLengthPosterior::new(model, &config);
        for t in 0..50 {
            posterior.update((t % 3) as f64 * 0.1, 0.0);
            assert!(posterior.len() <= 8);
        }
        assert_relative_eq!(posterior.total_mass(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_detects_level_shift() {
        let engine = BocpdEngine::default();
        let values = level_shift(80, 40, 5.0);
        let changepoints = engine.detect(&values);
        assert_eq!(changepoints, vec![40]);
    }

    #[test]
    fn test_single_spike_is_not_a_changepoint() {
        let engine = BocpdEngine::default();
        let mut values = level_shift(80, 80, 0.0);
        values[40] = 1000.0;
        assert!(engine.detect(&values).is_empty());
    }

    #[test]
    fn test_flat_series_has_no_changepoints() {
        let engine = BocpdEngine::default();
        assert!(engine.detect(&[3.0; 50]).is_empty());
    }

    #[test]
    fn test_map_drop_rule_reports_run_start() {
        let engine = BocpdEngine::new(BocpdConfig {
            rule: DetectionRule::MapDrop,
            ..Default::default()
        })
        .unwrap();
        let values = level_shift(80, 40, 5.0);
        assert_eq!(engine.detect(&values), vec![40]);
    }

    #[test]
    fn test_short_or_non_finite_input_is_empty() {
        let engine = BocpdEngine::default();
        assert_eq!(engine.run_with_trace(&[1.0; 19]), BocpdRun::default());
        let mut values = level_shift(60, 30, 5.0);
        values[7] = f64::NAN;
        assert_eq!(engine.run_with_trace(&values), BocpdRun::default());
    }

    #[test]
    fn test_trace_covers_every_step() {
        let engine = BocpdEngine::default();
        let values = level_shift(60, 30, 5.0);
        let run = engine.run_with_trace(&values);
        assert_eq!(run.trace.len(), 60);
        assert_eq!(run.trace[0].reset_probability, 1.0);
        assert!(run.trace[30].reset_probability > 0.3);
        assert!(run
            .trace
            .iter()
            .all(|step| step.sigma2 > 0.0 && step.reset_probability <= 1.0));
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let config = BocpdConfig {
            hazard_rate: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            BocpdEngine::new(config),
            Err(DetectionError::InvalidConfig(_))
        ));
        let config = BocpdConfig {
            max_hypotheses: 1,
            ..Default::default()
        };
        assert!(BocpdEngine::new(config).is_err());
    }
}
