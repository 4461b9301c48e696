//! Seeded series generators for unit tests and benchmarks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Standard normal draw (Box-Muller).
pub fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Piecewise constant levels with Gaussian noise of standard deviation `noise`.
///
/// Each `(len, level)` pair adds one segment.
pub fn step_series(segments: &[(usize, f64)], noise: f64, seed: u64) -> Vec<f64> {
    let mut rng = seeded_rng(seed);
    segments
        .iter()
        .flat_map(|&(len, level)| std::iter::repeat(level).take(len))
        .collect::<Vec<_>>()
        .into_iter()
        .map(|level| level + noise * gaussian(&mut rng))
        .collect()
}

/// Geometric random walk starting at `start`.
pub fn random_walk(n: usize, start: f64, volatility: f64, seed: u64) -> Vec<f64> {
    let mut rng = seeded_rng(seed);
    let mut price = start;
    (0..n)
        .map(|_| {
            price *= (volatility * gaussian(&mut rng)).exp();
            price
        })
        .collect()
}

/// Triangle wave between `low` and `high` with legs of `leg` points.
pub fn zigzag(n: usize, low: f64, high: f64, leg: usize) -> Vec<f64> {
    let leg = leg.max(1);
    let step = (high - low) / leg as f64;
    (0..n)
        .map(|i| {
            let phase = i % (2 * leg);
            if phase <= leg {
                low + step * phase as f64
            } else {
                high - step * (phase - leg) as f64
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generators_are_reproducible() {
        assert_eq!(random_walk(50, 100.0, 0.01, 7), random_walk(50, 100.0, 0.01, 7));
        assert_ne!(random_walk(50, 100.0, 0.01, 7), random_walk(50, 100.0, 0.01, 8));
        let steps = step_series(&[(10, 1.0), (5, 2.0)], 0.0, 1);
        assert_eq!(steps.len(), 15);
        assert_eq!(steps[9], 1.0);
        assert_eq!(steps[10], 2.0);
    }

    #[test]
    fn test_zigzag_turns_at_legs() {
        let wave = zigzag(9, 0.0, 4.0, 4);
        assert_eq!(wave, vec![0.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0, 1.0, 0.0]);
    }
}
