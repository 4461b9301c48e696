//! Multi-timeframe peak and trough analysis.
//!
//! - weekly: hybrid changepoint detection, classified by the extrema
//!   classifier
//! - daily: strict local extrema over `order` neighbours
//! - intraday: separated peaks and troughs among high-ATR bars
//!
//! The layers share nothing and run on scoped threads.

use std::thread;

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use log::info;
use serde::Serialize;

use crate::change_point::ChangePoint;
use crate::defaults::{
    DEFAULT_ATR_MULTIPLIER, DEFAULT_ATR_PERIOD, DEFAULT_DAILY_ORDER, DEFAULT_PEAK_DISTANCE,
};
use crate::extrema::{Extrema, ExtremaClassifier, ExtremaLabel};
use crate::hybrid::HybridChangePointDetector;
use crate::layers::{high_volatility_mask, local_extrema, separated_extrema};
use crate::series::{resample_weekly, Bars, Series};

/// Parameters of the intraday layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntradaySettings {
    pub atr_period: usize,
    pub atr_multiplier: f64,
    pub peak_distance: usize,
}

impl Default for IntradaySettings {
    fn default() -> Self {
        IntradaySettings {
            atr_period: DEFAULT_ATR_PERIOD,
            atr_multiplier: DEFAULT_ATR_MULTIPLIER,
            peak_distance: DEFAULT_PEAK_DISTANCE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub detector: HybridChangePointDetector,
    pub classifier: ExtremaClassifier,
    pub daily_order: usize,
    pub intraday: IntradaySettings,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        AnalysisSettings {
            detector: HybridChangePointDetector::default(),
            classifier: ExtremaClassifier::default(),
            daily_order: DEFAULT_DAILY_ORDER,
            intraday: IntradaySettings::default(),
        }
    }
}

/// A labelled point with its value and time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelledPoint {
    pub index: usize,
    pub label: ExtremaLabel,
    pub value: f64,
    pub time: Option<NaiveDateTime>,
}

/// Result of one timeframe; indices refer to `series`.
#[derive(Debug, Clone, Serialize)]
pub struct LayerResult {
    pub timeframe: &'static str,
    #[serde(skip)]
    pub series: Series,
    /// Empty for layers that do not run changepoint detection
    pub changepoints: Vec<ChangePoint>,
    pub extrema: Extrema,
}

impl LayerResult {
    pub fn points(&self) -> Vec<LabelledPoint> {
        let values = self.series.values();
        let timestamps = self.series.timestamps();
        self.extrema
            .labelled()
            .into_iter()
            .filter(|&(index, _)| index < values.len())
            .map(|(index, label)| LabelledPoint {
                index,
                label,
                value: values[index],
                time: timestamps.map(|ts| ts[index]),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub symbol: String,
    pub weekly: LayerResult,
    pub daily: LayerResult,
    pub intraday: Option<LayerResult>,
}

impl AnalysisReport {
    pub fn layers(&self) -> Vec<&LayerResult> {
        let mut layers = vec![&self.weekly, &self.daily];
        layers.extend(self.intraday.as_ref());
        layers
    }
}

/// Detect changepoints in `series` and classify them.
pub fn changepoint_layer(
    timeframe: &'static str,
    series: Series,
    detector: &HybridChangePointDetector,
    classifier: &ExtremaClassifier,
) -> Result<LayerResult> {
    let changepoints = detector.detect_comprehensive(series.values())?;
    let indices: Vec<usize> = changepoints.iter().map(|cp| cp.index).collect();
    let extrema = classifier.classify_changepoints(series.values(), &indices);
    info!(
        "{}: {} changepoints, {} peaks, {} troughs",
        timeframe,
        changepoints.len(),
        extrema.peaks.len(),
        extrema.troughs.len()
    );
    Ok(LayerResult {
        timeframe,
        series,
        changepoints,
        extrema,
    })
}

pub fn daily_layer(series: Series, order: usize) -> LayerResult {
    let extrema = local_extrema(series.values(), order);
    info!(
        "daily: {} peaks, {} troughs",
        extrema.peaks.len(),
        extrema.troughs.len()
    );
    LayerResult {
        timeframe: "daily",
        series,
        changepoints: vec![],
        extrema,
    }
}

/// Extrema among the bars of elevated volatility.
///
/// The layer's series holds only the kept bars.
pub fn intraday_layer(bars: &Bars, settings: &IntradaySettings) -> LayerResult {
    let mask = high_volatility_mask(
        &bars.high,
        &bars.low,
        &bars.close,
        settings.atr_period,
        settings.atr_multiplier,
    );
    let series = bars.close_series().select(&mask);
    let extrema = separated_extrema(series.values(), settings.peak_distance);
    info!(
        "intraday: {} of {} bars kept, {} peaks, {} troughs",
        series.len(),
        bars.len(),
        extrema.peaks.len(),
        extrema.troughs.len()
    );
    LayerResult {
        timeframe: "intraday",
        series,
        changepoints: vec![],
        extrema,
    }
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>, layer: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("The {} layer panicked", layer))
}

/// Run all layers; the weekly series is resampled from the daily bars.
pub fn analyze(
    symbol: &str,
    daily: &Bars,
    intraday: Option<&Bars>,
    settings: &AnalysisSettings,
) -> Result<AnalysisReport> {
    let daily_series = daily.close_series();
    let weekly_series = resample_weekly(&daily_series)
        .ok_or_else(|| anyhow!("Daily bars need timestamps to derive weekly closes"))?;

    let (weekly, daily, intraday) = thread::scope(|s| -> Result<_> {
        let weekly = s.spawn(|| {
            changepoint_layer(
                "weekly",
                weekly_series,
                &settings.detector,
                &settings.classifier,
            )
        });
        let daily = s.spawn(|| daily_layer(daily_series, settings.daily_order));
        let intraday =
            intraday.map(|bars| s.spawn(move || intraday_layer(bars, &settings.intraday)));

        let weekly = join(weekly, "weekly")??;
        let daily = join(daily, "daily")?;
        let intraday = intraday
            .map(|handle| join(handle, "intraday"))
            .transpose()?;
        Ok((weekly, daily, intraday))
    })?;

    Ok(AnalysisReport {
        symbol: symbol.to_string(),
        weekly,
        daily,
        intraday,
    })
}
