//! Score-driven (GAS) volatility model with Student-t innovations.
//!
//! The model keeps a time-varying scale `sigma2` and a slowly moving
//! location. After each observation the scale moves along the scaled score
//! of the Student-t log-likelihood:
//!
//! ```text
//! z2     = (x - mu)^2 / sigma2
//! score  = (nu + 3) / nu * ((nu + 1) * z2 / (nu + z2) - 1)
//! sigma2 = omega + alpha * score * sigma2 + beta * sigma2
//! ```
//!
//! The score is bounded in `[-(nu + 3) / nu, nu + 3]`, so a single outlier
//! can only scale the variance by a bounded factor. The location follows
//! the same robust weighting:
//!
//! ```text
//! mu = mu + lambda * (nu + 1) / (nu + z2) * (x - mu)
//! ```

use std::f64::consts::PI;

use log::warn;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::defaults::{
    DEFAULT_ALPHA, DEFAULT_BETA, DEFAULT_MEAN_SMOOTHING, DEFAULT_NU, DEFAULT_OMEGA,
    SIGMA2_CEILING, SIGMA2_FLOOR,
};
use crate::error::{DetectionError, Result};
use crate::stats;

/// Static parameters of the variance recursion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasParams {
    /// Student-t degrees of freedom
    pub nu: f64,
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
    /// Smoothing of the location; `None` pins the location at zero
    pub mean_smoothing: Option<f64>,
}

impl Default for GasParams {
    fn default() -> Self {
        GasParams {
            nu: DEFAULT_NU,
            omega: DEFAULT_OMEGA,
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
            mean_smoothing: Some(DEFAULT_MEAN_SMOOTHING),
        }
    }
}

impl GasParams {
    /// Reject parameters the recursion cannot run with.
    ///
    /// `nu <= 2` and `alpha + beta >= 1` still produce a bounded recursion
    /// and are only logged, unless `strict` is set.
    pub fn validate(&self, strict: bool) -> Result<()> {
        let named = [
            ("nu", self.nu),
            ("omega", self.omega),
            ("alpha", self.alpha),
            ("beta", self.beta),
        ];
        if let Some((name, _)) = named.iter().find(|(_, v)| !v.is_finite()) {
            return Err(DetectionError::invalid_config(format!(
                "{name} must be finite"
            )));
        }
        if self.nu <= 0.0 {
            return Err(DetectionError::invalid_config("nu must be positive"));
        }
        if self.omega <= 0.0 {
            return Err(DetectionError::invalid_config("omega must be positive"));
        }
        if self.alpha < 0.0 || self.beta < 0.0 {
            return Err(DetectionError::invalid_config(
                "alpha and beta must not be negative",
            ));
        }
        if let Some(lambda) = self.mean_smoothing {
            if !(lambda > 0.0 && lambda <= 1.0) {
                return Err(DetectionError::invalid_config(
                    "mean_smoothing must lie in (0, 1]",
                ));
            }
        }

        let mut ill_defined = vec![];
        if self.nu <= 2.0 {
            ill_defined.push(format!(
                "nu = {} leaves the Student-t variance undefined",
                self.nu
            ));
        }
        if !self.is_stationary() {
            ill_defined.push(format!(
                "alpha + beta = {} is not stationary",
                self.alpha + self.beta
            ));
        }
        if ill_defined.is_empty() {
            return Ok(());
        }
        let message = ill_defined.join(", ");
        if strict {
            return Err(DetectionError::InvalidConfig(message));
        }
        warn!("Long-run variance is ill-defined: {message}");
        Ok(())
    }

    pub fn is_stationary(&self) -> bool {
        self.alpha + self.beta < 1.0
    }

    /// Long-run variance `omega / (1 - beta)`, or `omega` when `beta >= 1`.
    pub fn unconditional_variance(&self) -> f64 {
        if self.beta < 1.0 {
            clamp_sigma2(self.omega / (1.0 - self.beta))
        } else {
            clamp_sigma2(self.omega)
        }
    }
}

/// Result of feeding one observation to the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    /// Log density of the observation under the predictive before the update
    pub log_density: f64,
    /// Scale after the update
    pub sigma2: f64,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct ScoreDrivenModel {
    params: GasParams,
    location: f64,
    sigma2: f64,
    // ln Γ((ν+1)/2) - ln Γ(ν/2) - ½ ln(νπ)
    log_norm: f64,
}

impl ScoreDrivenModel {
    pub fn new(params: GasParams, location: f64, sigma2: f64) -> Self {
        let nu = params.nu;
        let log_norm = ln_gamma((nu + 1.0) / 2.0) - ln_gamma(nu / 2.0) - 0.5 * (nu * PI).ln();
        let location = if params.mean_smoothing.is_some() {
            location
        } else {
            0.0
        };
        ScoreDrivenModel {
            params,
            location,
            sigma2: clamp_sigma2(sigma2),
            log_norm,
        }
    }

    /// Seed the scale from the sample variance of `warmup`.
    ///
    /// A flat or empty warm-up window falls back to the long-run variance.
    pub fn from_warmup(params: GasParams, warmup: &[f64]) -> Self {
        let sample = stats::variance(warmup);
        let sigma2 = if sample.is_finite() && sample > SIGMA2_FLOOR {
            sample
        } else {
            params.unconditional_variance()
        };
        let location = warmup.first().copied().unwrap_or(0.0);
        ScoreDrivenModel::new(params, location, sigma2)
    }

    pub fn params(&self) -> &GasParams {
        &self.params
    }

    pub fn location(&self) -> f64 {
        self.location
    }

    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    pub fn predictive_log_density(&self, x: f64) -> f64 {
        log_density(self.log_norm, self.params.nu, x, self.location, self.sigma2)
    }

    /// Evaluate `x` under the current predictive, then update the state.
    ///
    /// A non-finite observation has zero density and leaves the state as is.
    pub fn step(&mut self, x: f64) -> StepOutput {
        if !x.is_finite() {
            return StepOutput {
                log_density: f64::NEG_INFINITY,
                sigma2: self.sigma2,
                score: 0.0,
            };
        }
        let GasParams {
            nu,
            omega,
            alpha,
            beta,
            mean_smoothing,
        } = self.params;

        let log_density = self.predictive_log_density(x);
        let deviation = x - self.location;
        let z2 = deviation * deviation / self.sigma2;
        let score = (nu + 3.0) / nu * ((nu + 1.0) * z2 / (nu + z2) - 1.0);

        let next = omega + alpha * score * self.sigma2 + beta * self.sigma2;
        self.sigma2 = clamp_sigma2(next);

        if let Some(lambda) = mean_smoothing {
            let weight = (nu + 1.0) / (nu + z2);
            self.location += lambda * weight * deviation;
        }

        StepOutput {
            log_density,
            sigma2: self.sigma2,
            score,
        }
    }
}

/// Student-t log density with location `mu` and squared scale `sigma2`.
fn log_density(log_norm: f64, nu: f64, x: f64, mu: f64, sigma2: f64) -> f64 {
    let z2 = (x - mu).powi(2) / sigma2;
    log_norm - 0.5 * sigma2.ln() - (nu + 1.0) / 2.0 * (z2 / nu).ln_1p()
}

fn clamp_sigma2(sigma2: f64) -> f64 {
    if sigma2.is_nan() {
        SIGMA2_CEILING
    } else {
        sigma2.clamp(SIGMA2_FLOOR, SIGMA2_CEILING)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use statrs::distribution::{Continuous, StudentsT};

    #[test]
    fn test_density_matches_students_t() {
        let model = ScoreDrivenModel::new(GasParams::default(), 1.5, 0.25);
        let reference = StudentsT::new(1.5, 0.5, 4.0).unwrap();
        for x in [-3.0, 0.0, 1.5, 2.0, 40.0] {
            assert_relative_eq!(
                model.predictive_log_density(x),
                reference.ln_pdf(x),
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn test_step_reports_density_before_update() {
        let mut model = ScoreDrivenModel::new(GasParams::default(), 0.0, 1.0);
        let expected = model.predictive_log_density(0.5);
        let out = model.step(0.5);
        assert_relative_eq!(out.log_density, expected);
        assert_eq!(out.sigma2, model.sigma2());
    }

    #[test]
    fn test_observation_at_location_shrinks_variance() {
        let params = GasParams::default();
        let mut model = ScoreDrivenModel::new(params, 0.0, 1.0);
        let out = model.step(0.0);
        // z = 0 gives the minimal score -(nu + 3) / nu
        assert_relative_eq!(out.score, -7.0 / 4.0);
        assert_relative_eq!(out.sigma2, 0.001 + 0.06 * -1.75 + 0.9);
    }

    #[test]
    fn test_score_is_bounded_for_spikes() {
        let mut model = ScoreDrivenModel::new(GasParams::default(), 0.0, 1.0);
        let out = model.step(1e6);
        assert!(out.score <= 7.0 + 1e-9, "score = {}", out.score);
        // The variance grows by at most beta + alpha * (nu + 3)
        assert!(out.sigma2 <= 0.001 + 1.0 * (0.9 + 0.06 * 7.0) + 1e-9);
    }

    #[test]
    fn test_spike_moves_location_only_slightly() {
        let mut model = ScoreDrivenModel::new(GasParams::default(), 10.0, 1.0);
        model.step(1000.0);
        assert!((model.location() - 10.0).abs() < 0.1, "{}", model.location());
    }

    #[test]
    fn test_pinned_location_without_smoothing() {
        let params = GasParams {
            mean_smoothing: None,
            ..Default::default()
        };
        let mut model = ScoreDrivenModel::new(params, 5.0, 1.0);
        assert_eq!(model.location(), 0.0);
        model.step(3.0);
        assert_eq!(model.location(), 0.0);
    }

    #[test]
    fn test_warmup_seeds_variance() {
        let model = ScoreDrivenModel::from_warmup(GasParams::default(), &[1.0, 2.0, 3.0]);
        assert_relative_eq!(model.sigma2(), 1.0);
        assert_eq!(model.location(), 1.0);

        let flat = ScoreDrivenModel::from_warmup(GasParams::default(), &[4.0; 10]);
        assert_relative_eq!(flat.sigma2(), 0.001 / 0.1);

        let empty = ScoreDrivenModel::from_warmup(GasParams::default(), &[]);
        assert_relative_eq!(empty.sigma2(), 0.01);
    }

    #[test]
    fn test_sigma2_is_clamped() {
        let model = ScoreDrivenModel::new(GasParams::default(), 0.0, 0.0);
        assert_eq!(model.sigma2(), SIGMA2_FLOOR);
        let model = ScoreDrivenModel::new(GasParams::default(), 0.0, 1e300);
        assert_eq!(model.sigma2(), SIGMA2_CEILING);
    }

    #[test]
    fn test_non_finite_observation_leaves_state() {
        let mut model = ScoreDrivenModel::new(GasParams::default(), 0.0, 1.0);
        let out = model.step(f64::NAN);
        assert_eq!(out.log_density, f64::NEG_INFINITY);
        assert_eq!(model.sigma2(), 1.0);
    }

    #[test]
    fn test_validation() {
        assert!(GasParams::default().validate(true).is_ok());

        let heavy = GasParams {
            nu: 2.0,
            ..Default::default()
        };
        assert!(heavy.validate(false).is_ok());
        assert!(matches!(
            heavy.validate(true),
            Err(DetectionError::InvalidConfig(_))
        ));

        let explosive = GasParams {
            alpha: 0.2,
            beta: 0.85,
            ..Default::default()
        };
        assert!(!explosive.is_stationary());
        assert!(explosive.validate(false).is_ok());
        assert!(explosive.validate(true).is_err());

        for broken in [
            GasParams {
                omega: 0.0,
                ..Default::default()
            },
            GasParams {
                alpha: -0.1,
                ..Default::default()
            },
            GasParams {
                nu: f64::NAN,
                ..Default::default()
            },
            GasParams {
                mean_smoothing: Some(1.5),
                ..Default::default()
            },
        ] {
            assert!(broken.validate(false).is_err(), "{broken:?}");
        }
    }
}
