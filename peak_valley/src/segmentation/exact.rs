use std::time::Duration;

use log::debug;

use super::{ensure_finite, is_flat, scaled_penalty, Budget, CostModel, SegmentCost, Segmenter, Stopping};
use crate::defaults::{
    DEFAULT_EXACT_MAX_LEN, DEFAULT_MIN_SIZE, DEFAULT_N_BKPS, DEFAULT_TIME_BUDGET_MS,
};
use crate::error::{DetectionError, Result};
use crate::stats;

const METHOD: &str = "exact segmentation";

/// Optimal partitioning by dynamic programming.
///
/// With [`Stopping::Count`] the partition into exactly `k + 1` segments of at
/// least `min_size` points minimising the total cost is returned. With
/// [`Stopping::Penalty`] the number of segments is chosen by PELT.
#[derive(Debug, Clone)]
pub struct ExactSegmenter {
    pub cost: CostModel,
    pub stopping: Stopping,
    pub min_size: usize,
    /// Longer series are refused; the quadratic search does not scale
    pub max_len: usize,
    pub time_budget: Option<Duration>,
}

impl Default for ExactSegmenter {
    fn default() -> Self {
        ExactSegmenter {
            cost: CostModel::L2,
            stopping: Stopping::Count(DEFAULT_N_BKPS),
            min_size: DEFAULT_MIN_SIZE,
            max_len: DEFAULT_EXACT_MAX_LEN,
            time_budget: Some(Duration::from_millis(DEFAULT_TIME_BUDGET_MS)),
        }
    }
}

impl Segmenter for ExactSegmenter {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn detect(&self, values: &[f64]) -> Result<Vec<usize>> {
        let n = values.len();
        let min_size = self.min_size.max(1);
        if n < 2 * min_size {
            return Ok(vec![]);
        }
        ensure_finite(values)?;
        if n > self.max_len {
            return Err(DetectionError::failure(
                METHOD,
                format!("{n} points exceed the limit of {}", self.max_len),
            ));
        }

        if is_flat(values) {
            debug!("Flat series, no segmentation");
            return Ok(vec![]);
        }
        let cost = SegmentCost::new(self.cost, values);

        let budget = Budget::start(METHOD, self.time_budget);
        let starts = match self.stopping {
            Stopping::Count(k) => optimal_partition(&cost, k, min_size, &budget)?,
            Stopping::Penalty(penalty) => {
                let penalty = scaled_penalty(penalty, n, stats::variance(values));
                pelt(&cost, penalty, min_size, &budget)?
            }
        };
        Ok(starts.into_iter().map(|start| start - 1).collect())
    }
}

/// Segment starts of the optimal partition into `k + 1` segments.
fn optimal_partition(
    cost: &SegmentCost,
    k: usize,
    min_size: usize,
    budget: &Budget,
) -> Result<Vec<usize>> {
    let n = cost.len();
    if k == 0 {
        return Ok(vec![]);
    }
    let needed = (k + 1) * min_size;
    if n < needed {
        return Err(DetectionError::InsufficientData { needed, got: n });
    }

    // best[j][t]: minimal cost of covering [0, t) with j + 1 segments
    let mut best = vec![vec![f64::INFINITY; n + 1]; k + 1];
    let mut back = vec![vec![0usize; n + 1]; k + 1];
    for t in min_size..=n {
        best[0][t] = cost.cost(0, t);
    }

    for j in 1..=k {
        budget.check()?;
        // The remaining k - j segments need room after t
        let last = n - (k - j) * min_size;
        for t in (j + 1) * min_size..=last {
            let mut min_cost = f64::INFINITY;
            let mut arg = 0;
            for s in j * min_size..=t - min_size {
                let candidate = best[j - 1][s] + cost.cost(s, t);
                // Strict comparison keeps the earliest split on ties
                if candidate < min_cost {
                    min_cost = candidate;
                    arg = s;
                }
            }
            best[j][t] = min_cost;
            back[j][t] = arg;
        }
    }

    if !best[k][n].is_finite() {
        return Err(DetectionError::failure(
            METHOD,
            "no admissible partition found",
        ));
    }

    let mut starts = Vec::with_capacity(k);
    let mut end = n;
    for j in (1..=k).rev() {
        let start = back[j][end];
        starts.push(start);
        end = start;
    }
    starts.reverse();
    Ok(starts)
}

/// Pruned exact linear time search with a minimum segment length.
fn pelt(cost: &SegmentCost, penalty: f64, min_size: usize, budget: &Budget) -> Result<Vec<usize>> {
    let n = cost.len();

    // f[t] = optimal cost for data[0..t]
    // Initialize with -penalty so first segment doesn't double-count
    let mut f = vec![f64::INFINITY; n + 1];
    f[0] = -penalty;
    // cp[t] = last change point before t
    let mut cp = vec![0usize; n + 1];
    // candidate set for pruning
    let mut r = vec![0usize];

    for t in min_size..=n {
        if t % 64 == 0 {
            budget.check()?;
        }
        let best = r
            .iter()
            .filter(|&&tau| t - tau >= min_size)
            .map(|&tau| (f[tau] + cost.cost(tau, t) + penalty, tau))
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let Some((min_cost, best_tau)) = best else {
            continue;
        };
        f[t] = min_cost;
        cp[t] = best_tau;

        // Remove candidates that can never be optimal again
        r.retain(|&tau| t - tau < min_size || f[tau] + cost.cost(tau, t) <= min_cost);
        if t + min_size <= n {
            r.push(t);
        }
    }

    if !f[n].is_finite() {
        return Err(DetectionError::failure(METHOD, "no admissible partition found"));
    }

    let mut starts = vec![];
    let mut current = n;
    while cp[current] > 0 {
        starts.push(cp[current]);
        current = cp[current];
    }
    starts.reverse();
    Ok(starts)
}
