//! Extrema finders of the daily and intraday layers.
//!
//! These do not run changepoint detection: the daily layer takes strict
//! local extrema over a symmetric neighbourhood, the intraday layer picks
//! separated peaks among the bars of elevated volatility.

use average::Mean;
use log::debug;

use crate::extrema::Extrema;
use crate::stats::average_true_range;

/// Strict local maxima and minima over `order` neighbours on each side.
///
/// Near the ends the neighbourhood is clipped; the first and last point are
/// never extrema.
pub fn local_extrema(values: &[f64], order: usize) -> Extrema {
    let n = values.len();
    let mut extrema = Extrema::default();
    if n < 3 || order == 0 {
        return extrema;
    }
    for i in 1..n - 1 {
        let current = values[i];
        if !current.is_finite() {
            continue;
        }
        let start = i.saturating_sub(order);
        let end = (i + order + 1).min(n);
        let mut neighbours = values[start..i].iter().chain(&values[i + 1..end]);
        if neighbours.clone().all(|&v| current > v) {
            extrema.peaks.push(i);
        } else if neighbours.all(|&v| current < v) {
            extrema.troughs.push(i);
        }
    }
    extrema
}

/// Local maxima at least `distance` points apart.
///
/// A flat top counts once, at its middle (rounded down). When two maxima are
/// closer than `distance` the higher one stays; on equal heights the earlier
/// one.
pub fn find_peaks(values: &[f64], distance: usize) -> Vec<usize> {
    let candidates = local_maxima(values);
    if distance <= 1 || candidates.len() < 2 {
        return candidates;
    }

    let mut by_height: Vec<usize> = (0..candidates.len()).collect();
    by_height.sort_by(|&a, &b| {
        values[candidates[b]]
            .total_cmp(&values[candidates[a]])
            .then(a.cmp(&b))
    });

    let mut keep = vec![true; candidates.len()];
    for &i in &by_height {
        if !keep[i] {
            continue;
        }
        let peak = candidates[i];
        for j in (0..i).rev() {
            if peak - candidates[j] >= distance {
                break;
            }
            keep[j] = false;
        }
        for j in i + 1..candidates.len() {
            if candidates[j] - peak >= distance {
                break;
            }
            keep[j] = false;
        }
    }

    candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(peak, kept)| kept.then_some(peak))
        .collect()
}

fn local_maxima(values: &[f64]) -> Vec<usize> {
    let n = values.len();
    let mut peaks = vec![];
    let mut i = 1;
    while i + 1 < n {
        if values[i - 1] < values[i] {
            // Walk over a plateau
            let mut ahead = i + 1;
            while ahead + 1 < n && values[ahead] == values[i] {
                ahead += 1;
            }
            if values[ahead] < values[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

/// Peaks and troughs of `values` at least `distance` apart.
pub fn separated_extrema(values: &[f64], distance: usize) -> Extrema {
    let negated: Vec<f64> = values.iter().map(|v| -v).collect();
    Extrema {
        peaks: find_peaks(values, distance),
        troughs: find_peaks(&negated, distance),
    }
}

/// Bars whose ATR exceeds `multiplier` times the mean ATR.
///
/// Bars before the first ATR value are never kept.
pub fn high_volatility_mask(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
    multiplier: f64,
) -> Vec<bool> {
    let atr = average_true_range(high, low, close, period);
    let mean: Mean = atr.iter().flatten().copied().collect();
    if mean.is_empty() {
        return vec![false; atr.len()];
    }
    let cutoff = mean.mean() * multiplier;
    let mask: Vec<bool> = atr.iter().map(|v| v.is_some_and(|v| v > cutoff)).collect();
    debug!(
        "ATR filter keeps {} of {} bars (cutoff {:.4})",
        mask.iter().filter(|&&k| k).count(),
        mask.len(),
        cutoff
    );
    mask
}
