//! Peak and trough labelling of changepoints.
//!
//! A changepoint is a peak when its value is strictly above every value in
//! the windows considered, a trough when strictly below. The left window
//! `[i - window, i)` is always considered. The right window
//! `(i, i + window]` is added with `check_right`, delaying the label by
//! `window` points; at the end of the series, where no right neighbour
//! exists yet, the left window alone decides.
//!
//! Anything else (ties, interior values, no left neighbour) is dropped
//! rather than guessed.

use serde::Serialize;

use crate::defaults::{DEFAULT_EXTREMA_WINDOW, EXTREMA_TOLERANCE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtremaLabel {
    Peak,
    Trough,
}

/// Disjoint, ascending peak and trough indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Extrema {
    pub peaks: Vec<usize>,
    pub troughs: Vec<usize>,
}

impl Extrema {
    pub fn len(&self) -> usize {
        self.peaks.len() + self.troughs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty() && self.troughs.is_empty()
    }

    /// All labelled points in index order.
    pub fn labelled(&self) -> Vec<(usize, ExtremaLabel)> {
        let mut out: Vec<(usize, ExtremaLabel)> = self
            .peaks
            .iter()
            .map(|&i| (i, ExtremaLabel::Peak))
            .chain(self.troughs.iter().map(|&i| (i, ExtremaLabel::Trough)))
            .collect();
        out.sort_unstable_by_key(|&(i, _)| i);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtremaClassifier {
    pub window: usize,
    pub check_right: bool,
}

impl Default for ExtremaClassifier {
    fn default() -> Self {
        ExtremaClassifier {
            window: DEFAULT_EXTREMA_WINDOW,
            check_right: false,
        }
    }
}

/// `a` exceeds `b` by more than the relative tolerance.
fn strictly_above(a: f64, b: f64) -> bool {
    a - b > EXTREMA_TOLERANCE * a.abs().max(b.abs())
}

fn nearly_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= EXTREMA_TOLERANCE * a.abs().max(b.abs())
}

impl ExtremaClassifier {
    pub fn new(window: usize, check_right: bool) -> Self {
        ExtremaClassifier {
            window,
            check_right,
        }
    }

    /// Label a single index, or `None` when it is not a strict extreme.
    pub fn classify(&self, series: &[f64], index: usize) -> Option<ExtremaLabel> {
        let current = *series.get(index)?;
        let left = &series[index.saturating_sub(self.window)..index];
        if left.is_empty() {
            return None;
        }
        let right: &[f64] = if self.check_right {
            let end = (index + 1 + self.window).min(series.len());
            &series[index + 1..end]
        } else {
            &[]
        };

        let mut neighbours = left.iter().chain(right).copied();
        if !current.is_finite() || neighbours.clone().any(|v| !v.is_finite()) {
            return None;
        }
        if neighbours.clone().all(|v| strictly_above(current, v)) {
            Some(ExtremaLabel::Peak)
        } else if neighbours.all(|v| strictly_above(v, current)) {
            Some(ExtremaLabel::Trough)
        } else {
            None
        }
    }

    /// Split changepoints into peaks and troughs.
    ///
    /// Out of range, duplicate and unclassifiable indices are dropped. A
    /// point equal to an already labelled point of the same role within
    /// `window` is dropped in favour of the earlier one.
    pub fn classify_changepoints(&self, series: &[f64], changepoints: &[usize]) -> Extrema {
        let mut candidates = changepoints.to_vec();
        candidates.sort_unstable();
        candidates.dedup();

        let mut extrema = Extrema::default();
        for index in candidates {
            let Some(label) = self.classify(series, index) else {
                continue;
            };
            let same_role = match label {
                ExtremaLabel::Peak => &mut extrema.peaks,
                ExtremaLabel::Trough => &mut extrema.troughs,
            };
            let repeats = same_role.last().is_some_and(|&prev| {
                index - prev <= self.window && nearly_equal(series[prev], series[index])
            });
            if !repeats {
                same_role.push(index);
            }
        }
        extrema
    }
}

/// Peaks and troughs among `changepoints`, as two ascending index lists.
pub fn classify_changepoints(
    series: &[f64],
    changepoints: &[usize],
    window: usize,
    check_right: bool,
) -> (Vec<usize>, Vec<usize>) {
    let extrema =
        ExtremaClassifier::new(window, check_right).classify_changepoints(series, changepoints);
    (extrema.peaks, extrema.troughs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZIGZAG: [f64; 13] = [1.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 5.0];

    #[test]
    fn test_left_only_classification() {
        let (peaks, troughs) = classify_changepoints(&ZIGZAG, &[4, 8, 12], 1, false);
        assert_eq!(peaks, vec![4, 12]);
        assert_eq!(troughs, vec![8]);
    }

    #[test]
    fn test_right_window_rejects_slopes() {
        let all: Vec<usize> = (0..ZIGZAG.len()).collect();
        let (peaks, troughs) = classify_changepoints(&ZIGZAG, &all, 1, true);
        // The last point has no right neighbour and falls back to the left window
        assert_eq!(peaks, vec![4, 12]);
        assert_eq!(troughs, vec![8]);
    }

    #[test]
    fn test_left_only_labels_rising_points() {
        let classifier = ExtremaClassifier::new(2, false);
        assert_eq!(classifier.classify(&ZIGZAG, 3), Some(ExtremaLabel::Peak));
        let classifier = ExtremaClassifier::new(2, true);
        assert_eq!(classifier.classify(&ZIGZAG, 3), None);
    }

    #[test]
    fn test_ties_are_not_extrema() {
        let values = [1.0, 3.0, 3.0, 1.0, 1.0];
        let classifier = ExtremaClassifier::new(1, true);
        assert_eq!(classifier.classify(&values, 1), None);
        assert_eq!(classifier.classify(&values, 2), None);
        // Within tolerance counts as a tie
        let values = [1.0, 3.0, 3.0 + 1e-12, 1.0];
        assert_eq!(classifier.classify(&values, 2), None);
    }

    #[test]
    fn test_no_left_neighbour() {
        let classifier = ExtremaClassifier::new(2, false);
        assert_eq!(classifier.classify(&ZIGZAG, 0), None);
        assert_eq!(ExtremaClassifier::new(0, false).classify(&ZIGZAG, 4), None);
        assert_eq!(classifier.classify(&ZIGZAG, 99), None);
    }

    #[test]
    fn test_window_is_clipped_at_start() {
        let values = [5.0, 1.0, 2.0, 3.0];
        let classifier = ExtremaClassifier::new(3, false);
        assert_eq!(classifier.classify(&values, 1), Some(ExtremaLabel::Trough));
    }

    #[test]
    fn test_equal_extremes_keep_the_earliest() {
        // Both 5s beat their one-point left window
        let values = [1.0, 5.0, 0.0, 5.0, 2.0];
        let classifier = ExtremaClassifier::new(2, false);
        let extrema = classifier.classify_changepoints(&values, &[1, 3]);
        assert_eq!(extrema.peaks, vec![1]);
        let extrema = ExtremaClassifier::new(1, false).classify_changepoints(&values, &[1, 3]);
        assert_eq!(extrema.peaks, vec![1, 3]);
    }

    #[test]
    fn test_unsorted_duplicates_and_nan() {
        let mut values = ZIGZAG.to_vec();
        values[11] = f64::NAN;
        let extrema = ExtremaClassifier::new(1, false).classify_changepoints(&values, &[12, 4, 4, 8]);
        assert_eq!(extrema.peaks, vec![4]);
        assert_eq!(extrema.troughs, vec![8]);
        assert_eq!(
            extrema.labelled(),
            vec![(4, ExtremaLabel::Peak), (8, ExtremaLabel::Trough)]
        );
    }

    #[test]
    fn test_constant_series_has_no_extrema() {
        let values = [50.0; 50];
        let all: Vec<usize> = (0..50).collect();
        assert!(ExtremaClassifier::default()
            .classify_changepoints(&values, &all)
            .is_empty());
    }
}
