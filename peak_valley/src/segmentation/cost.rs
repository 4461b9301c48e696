use serde::{Deserialize, Serialize};

use crate::stats::PrefixSums;

const VARIANCE_FLOOR: f64 = 1e-12;

/// Per-segment cost, lower is a better fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostModel {
    /// Sum of squared deviations from the segment mean
    #[default]
    L2,
    /// Gaussian negative log-likelihood with segment mean and variance,
    /// sensitive to volatility changes as well as level shifts
    NormalMeanVar,
}

/// Cost of arbitrary `[start, end)` segments of one series in O(1).
#[derive(Debug, Clone)]
pub struct SegmentCost {
    model: CostModel,
    sums: PrefixSums,
}

impl SegmentCost {
    pub fn new(model: CostModel, values: &[f64]) -> Self {
        SegmentCost {
            model,
            sums: PrefixSums::new(values),
        }
    }

    pub fn len(&self) -> usize {
        self.sums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    pub fn cost(&self, start: usize, end: usize) -> f64 {
        if start >= end {
            return 0.0;
        }
        match self.model {
            CostModel::L2 => self.sums.squared_deviation(start, end),
            CostModel::NormalMeanVar => {
                let variance = self.sums.variance(start, end).max(VARIANCE_FLOOR);
                (end - start) as f64 * variance.ln()
            }
        }
    }
}
