use chrono::{Datelike, NaiveDateTime};
use itertools::Itertools;
use serde::Serialize;

use crate::error::{DetectionError, Result};

/// Ordered observations with optional timestamps.
///
/// Timestamps are carried for reporting only; every detector works on
/// positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    values: Vec<f64>,
    timestamps: Option<Vec<NaiveDateTime>>,
}

impl Series {
    pub fn new(values: Vec<f64>) -> Self {
        Series {
            values,
            timestamps: None,
        }
    }

    pub fn with_timestamps(values: Vec<f64>, timestamps: Vec<NaiveDateTime>) -> Result<Self> {
        if values.len() != timestamps.len() {
            return Err(DetectionError::invalid_config(format!(
                "{} values but {} timestamps",
                values.len(),
                timestamps.len()
            )));
        }
        Ok(Series {
            values,
            timestamps: Some(timestamps),
        })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn timestamps(&self) -> Option<&[NaiveDateTime]> {
        self.timestamps.as_deref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn first_non_finite(&self) -> Option<usize> {
        first_non_finite(&self.values)
    }

    /// Log returns, or plain first differences if any value is not positive.
    pub fn log_returns(&self) -> Vec<f64> {
        log_returns(&self.values)
    }

    /// Human readable position: the timestamp if known, else the index.
    pub fn label(&self, index: usize) -> String {
        match self.timestamps.as_ref().and_then(|ts| ts.get(index)) {
            Some(ts) => ts.format("%Y-%m-%d %H:%M").to_string(),
            None => index.to_string(),
        }
    }

    /// Restrict to the positions where `keep` holds, preserving order.
    pub fn select(&self, keep: &[bool]) -> Series {
        let picked = |i: &usize| keep.get(*i).copied().unwrap_or(false);
        let values = (0..self.len())
            .filter(picked)
            .map(|i| self.values[i])
            .collect();
        let timestamps = self
            .timestamps
            .as_ref()
            .map(|ts| (0..ts.len()).filter(picked).map(|i| ts[i]).collect());
        Series { values, timestamps }
    }
}

pub fn first_non_finite(values: &[f64]) -> Option<usize> {
    values.iter().position(|v| !v.is_finite())
}

pub fn log_returns(values: &[f64]) -> Vec<f64> {
    if values.iter().all(|v| *v > 0.0) {
        values
            .iter()
            .tuple_windows()
            .map(|(a, b)| (b / a).ln())
            .collect()
    } else {
        values.iter().tuple_windows().map(|(a, b)| b - a).collect()
    }
}

/// OHLC bars without the open, which no layer uses.
#[derive(Debug, Clone, PartialEq)]
pub struct Bars {
    pub timestamps: Vec<NaiveDateTime>,
    pub close: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
}

impl Bars {
    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn close_series(&self) -> Series {
        Series {
            values: self.close.clone(),
            timestamps: Some(self.timestamps.clone()),
        }
    }
}

/// Last observation of every ISO week.
///
/// Returns `None` for a series without timestamps.
pub fn resample_weekly(series: &Series) -> Option<Series> {
    let timestamps = series.timestamps()?;
    let weeks = timestamps
        .iter()
        .zip(series.values())
        .chunk_by(|(ts, _)| ts.iso_week());

    let (timestamps, values): (Vec<NaiveDateTime>, Vec<f64>) = weeks
        .into_iter()
        .filter_map(|(_, week)| week.last().map(|(ts, v)| (*ts, *v)))
        .unzip();

    Some(Series {
        values,
        timestamps: Some(timestamps),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_mismatched_timestamps_are_rejected() {
        let err = Series::with_timestamps(vec![1.0, 2.0], vec![day(2024, 1, 1)]).unwrap_err();
        assert!(matches!(err, DetectionError::InvalidConfig(_)));
    }

    #[test]
    fn test_log_returns() {
        let series = Series::new(vec![1.0, std::f64::consts::E, 1.0]);
        let returns = series.log_returns();
        assert_eq!(returns.len(), 2);
        assert_relative_eq!(returns[0], 1.0);
        assert_relative_eq!(returns[1], -1.0);
    }

    #[test]
    fn test_returns_fall_back_to_differences() {
        assert_eq!(log_returns(&[0.0, 1.0, -1.0]), vec![1.0, -2.0]);
        assert!(log_returns(&[5.0]).is_empty());
    }

    #[test]
    fn test_first_non_finite() {
        let series = Series::new(vec![1.0, f64::NAN, f64::INFINITY]);
        assert_eq!(series.first_non_finite(), Some(1));
        assert_eq!(Series::new(vec![1.0]).first_non_finite(), None);
    }

    #[test]
    fn test_label_prefers_timestamps() {
        let series = Series::with_timestamps(vec![1.0], vec![day(2024, 3, 8)]).unwrap();
        assert_eq!(series.label(0), "2024-03-08 00:00");
        assert_eq!(series.label(5), "5");
        assert_eq!(Series::new(vec![1.0]).label(0), "0");
    }

    #[test]
    fn test_select_keeps_timestamps_aligned() {
        let series =
            Series::with_timestamps(vec![1.0, 2.0, 3.0], vec![day(2024, 1, 1), day(2024, 1, 2), day(2024, 1, 3)])
                .unwrap();
        let picked = series.select(&[true, false, true]);
        assert_eq!(picked.values(), &[1.0, 3.0]);
        assert_eq!(picked.timestamps().unwrap(), &[day(2024, 1, 1), day(2024, 1, 3)]);
    }

    #[test]
    fn test_resample_weekly_takes_last_close() {
        // 2024-01-05 is a Friday, 2024-01-08 the following Monday.
        let series = Series::with_timestamps(
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![
                day(2024, 1, 3),
                day(2024, 1, 4),
                day(2024, 1, 5),
                day(2024, 1, 8),
                day(2024, 1, 9),
            ],
        )
        .unwrap();
        let weekly = resample_weekly(&series).unwrap();
        assert_eq!(weekly.values(), &[3.0, 5.0]);
        assert_eq!(weekly.timestamps().unwrap(), &[day(2024, 1, 5), day(2024, 1, 9)]);

        assert!(resample_weekly(&Series::new(vec![1.0])).is_none());
    }

    #[test]
    fn test_bars_close_series() {
        let bars = Bars {
            timestamps: vec![day(2024, 1, 1)],
            close: vec![2.0],
            high: vec![3.0],
            low: vec![1.0],
        };
        assert_eq!(bars.len(), 1);
        assert_eq!(bars.close_series().values(), &[2.0]);
    }
}
