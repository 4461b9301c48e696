use std::fmt::Display;

use average::{concatenate, Estimate, Mean, Variance};

use readable::num::*;

pub trait VecAggregation {
    fn median(&mut self) -> Option<f64>;
}

concatenate!(AggStats, [Mean, mean], [Variance, sample_variance]);

pub fn aggregate(values: impl IntoIterator<Item = f64>) -> Stats {
    let s: AggStats = values.into_iter().collect();
    Stats {
        mean: s.mean(),
        stddev: s.sample_variance().sqrt(),
        len: s.mean.len() as usize,
    }
}

/// Sample variance of a slice; zero for fewer than two values.
pub fn variance(values: &[f64]) -> f64 {
    aggregate(values.iter().copied()).stddev.powi(2)
}

#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub mean: f64,
    pub stddev: f64,
    pub len: usize,
}

impl Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "μ: {} σ: {} n: {}",
            Float::from(self.mean),
            Float::from(self.stddev),
            Unsigned::from(self.len),
        )
    }
}

impl VecAggregation for Vec<f64> {
    fn median(&mut self) -> Option<f64> {
        self.sort_by(f64::total_cmp);
        match self.len() {
            0 => None,
            even if even % 2 == 0 => {
                let left = self[even / 2 - 1];
                let right = self[even / 2];
                Some((left + right) / 2.0)
            }
            odd => Some(self[odd / 2]),
        }
    }
}

/// Running sums over a slice, giving O(1) segment statistics.
#[derive(Debug, Clone)]
pub struct PrefixSums {
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl PrefixSums {
    pub fn new(values: &[f64]) -> Self {
        let mut sum = Vec::with_capacity(values.len() + 1);
        let mut sum_sq = Vec::with_capacity(values.len() + 1);
        sum.push(0.0);
        sum_sq.push(0.0);
        for (i, v) in values.iter().enumerate() {
            sum.push(sum[i] + v);
            sum_sq.push(sum_sq[i] + v * v);
        }
        PrefixSums { sum, sum_sq }
    }

    pub fn len(&self) -> usize {
        self.sum.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of squared deviations from the mean of `[start, end)`.
    pub fn squared_deviation(&self, start: usize, end: usize) -> f64 {
        if start >= end {
            return 0.0;
        }
        let n = (end - start) as f64;
        let s = self.sum[end] - self.sum[start];
        let sq = self.sum_sq[end] - self.sum_sq[start];
        (sq - s * s / n).max(0.0)
    }

    /// Population variance of `[start, end)`.
    pub fn variance(&self, start: usize, end: usize) -> f64 {
        if start >= end {
            return 0.0;
        }
        self.squared_deviation(start, end) / (end - start) as f64
    }
}

/// Sample standard deviation over trailing windows.
///
/// Entry `i` covers `values[i + 1 - window..=i]`; the first `window - 1`
/// entries are `None`.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window < 2 {
        return vec![None; values.len()];
    }
    let sums = PrefixSums::new(values);
    (0..values.len())
        .map(|i| {
            (i + 1 >= window).then(|| {
                let start = i + 1 - window;
                (sums.squared_deviation(start, i + 1) / (window - 1) as f64).sqrt()
            })
        })
        .collect()
}

/// True range of each bar; the first bar uses its own high-low span.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let n = high.len().min(low.len()).min(close.len());
    (0..n)
        .map(|i| {
            let span = high[i] - low[i];
            if i == 0 {
                span
            } else {
                let prev = close[i - 1];
                span.max((high[i] - prev).abs()).max((low[i] - prev).abs())
            }
        })
        .collect()
}

/// Wilder's Average True Range.
///
/// Seeded with the mean true range of the first `period` bars; bars before
/// that have no value.
pub fn average_true_range(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
) -> Vec<Option<f64>> {
    let tr = true_range(high, low, close);
    let mut atr = vec![None; tr.len()];
    if period == 0 || tr.len() < period {
        return atr;
    }
    let seed: Mean = tr[..period].iter().copied().collect();
    let mut current = seed.mean();
    atr[period - 1] = Some(current);
    for i in period..tr.len() {
        current = (current * (period - 1) as f64 + tr[i]) / period as f64;
        atr[i] = Some(current);
    }
    atr
}
