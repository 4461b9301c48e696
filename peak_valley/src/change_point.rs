//! Changepoint records shared by the detectors.
//!
//! Detectors return bare indices. [`enrich_change_points`] turns them into
//! [`ChangePoint`] records carrying the detection source, the direction of
//! the level change and a confidence score.
//!
//! An index marks the last observation of the regime that ends there. The
//! regime before a changepoint runs from the previous changepoint
//! (exclusive) up to and including it; the regime after runs up to and
//! including the next changepoint.

use average::Mean;
use serde::Serialize;

/// Direction of a detected change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDirection {
    /// The level after the changepoint is higher
    Increase,
    /// The level after the changepoint is lower
    Decrease,
}

/// Strategy that produced a changepoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Exact,
    Greedy,
    Online,
    Volatility,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Exact => "exact",
            Method::Greedy => "greedy",
            Method::Online => "online",
            Method::Volatility => "volatility",
        }
    }

    /// Offline segmentations win ties against the online and fallback
    /// detectors.
    pub fn is_offline(&self) -> bool {
        matches!(self, Method::Exact | Method::Greedy)
    }
}

/// A detected change point in the series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangePoint {
    /// Position in the series (0-indexed)
    pub index: usize,
    pub source: Method,
    /// Percentage change between the regime means around this point
    pub magnitude_pct: f64,
    /// Confidence score [0.0, 1.0]
    pub confidence: f64,
    /// Direction of the change
    pub direction: ChangeDirection,
}

/// Attach regime statistics to ascending, deduplicated indices.
///
/// Indices outside the series are skipped.
pub fn enrich_change_points(indices: &[(usize, Method)], values: &[f64]) -> Vec<ChangePoint> {
    let n = values.len();
    let mut result = vec![];

    for (i, &(idx, source)) in indices.iter().enumerate() {
        if idx + 1 >= n {
            continue;
        }

        // The regime from the previous change point (or the start) up to this one
        let before_start = if i > 0 { indices[i - 1].0 + 1 } else { 0 };
        let before_mean = segment_mean(&values[before_start.min(idx)..=idx]);

        // The regime from here up to the next change point (or the end)
        let after_end = indices
            .get(i + 1)
            .map_or(n, |&(next, _)| (next + 1).min(n));
        let after_mean = segment_mean(&values[idx + 1..after_end.max(idx + 2)]);

        let magnitude_pct = if before_mean.abs() > f64::EPSILON {
            ((after_mean - before_mean) / before_mean) * 100.0
        } else {
            0.0
        };

        let direction = if after_mean >= before_mean {
            ChangeDirection::Increase
        } else {
            ChangeDirection::Decrease
        };

        result.push(ChangePoint {
            index: idx,
            source,
            magnitude_pct,
            confidence: calculate_confidence(idx + 1, n, magnitude_pct.abs()),
            direction,
        });
    }

    result
}

fn segment_mean(segment: &[f64]) -> f64 {
    let mean: Mean = segment.iter().copied().collect();
    mean.mean()
}

// Confidence calculation constants
/// Segments shorter than this on either side get very low confidence
const CONFIDENCE_MIN_SEGMENT_VERY_LOW: usize = 3;
/// Segments shorter than this on either side get low confidence
const CONFIDENCE_MIN_SEGMENT_LOW: usize = 5;
/// Segments shorter than this on either side get moderate confidence
const CONFIDENCE_MIN_SEGMENT_MODERATE: usize = 10;

const CONFIDENCE_FACTOR_VERY_LOW: f64 = 0.3;
const CONFIDENCE_FACTOR_LOW: f64 = 0.6;
const CONFIDENCE_FACTOR_MODERATE: f64 = 0.8;
const CONFIDENCE_FACTOR_HIGH: f64 = 1.0;

/// A shift of this many percent between regime means is full confidence
const CONFIDENCE_MAGNITUDE_SCALE: f64 = 10.0;

const CONFIDENCE_WEIGHT_SIZE: f64 = 0.4;
const CONFIDENCE_WEIGHT_MAGNITUDE: f64 = 0.6;

/// Confidence from the room on both sides of the split and the size of the
/// level shift.
fn calculate_confidence(split: usize, total_len: usize, magnitude_pct: f64) -> f64 {
    let min_segment = split.min(total_len.saturating_sub(split));
    let size_factor = if min_segment < CONFIDENCE_MIN_SEGMENT_VERY_LOW {
        CONFIDENCE_FACTOR_VERY_LOW
    } else if min_segment < CONFIDENCE_MIN_SEGMENT_LOW {
        CONFIDENCE_FACTOR_LOW
    } else if min_segment < CONFIDENCE_MIN_SEGMENT_MODERATE {
        CONFIDENCE_FACTOR_MODERATE
    } else {
        CONFIDENCE_FACTOR_HIGH
    };

    let magnitude_factor = (magnitude_pct / CONFIDENCE_MAGNITUDE_SCALE).min(1.0);

    let confidence =
        CONFIDENCE_WEIGHT_SIZE * size_factor + CONFIDENCE_WEIGHT_MAGNITUDE * magnitude_factor;

    confidence.clamp(0.0, 1.0)
}
