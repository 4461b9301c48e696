use std::{
    fs::File,
    io::{self, ErrorKind, Write},
    path::Path,
};

use anyhow::{anyhow, bail, Result};
use itertools::Itertools;
use plotly::{
    common::{Line, Marker, MarkerSymbol, Mode, Title},
    layout::{Axis, GridPattern, Legend, LayoutGrid},
    Configuration, Layout, Plot, Scatter,
};
use readable::num::{Float, Unsigned};
use serde::Serialize;
use sparklines::spark;

use crate::{
    analysis::{AnalysisReport, LayerResult},
    bocpd::BocpdRun,
    change_point::{ChangeDirection, ChangePoint},
    extrema::ExtremaLabel,
    series::Series,
    stats::{aggregate, VecAggregation},
};

/// Red, 80% opacity.
const PEAK_COLOR: &str = "rgba(220, 53, 69, 0.8)";

/// Green, 80% opacity.
const TROUGH_COLOR: &str = "rgba(40, 167, 69, 0.8)";

const INCREASE_COLOR: &str = "rgba(0, 123, 255, 0.8)";
const DECREASE_COLOR: &str = "rgba(255, 140, 0, 0.8)";

const SERIES_LINE_WIDTH: f64 = 1.5;
const MARKER_SIZE: usize = 12;

/// Points of the sparkline in the text summary.
const SPARKLINE_WIDTH: usize = 60;

/// The plot grid is laid out for at most this many stacked panels.
const MAX_PANELS: usize = 4;

const DEFAULT_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{{TITLE}}</title>
    {{PLOTLY_HEAD}}
</head>
<body>
    {{PLOTLY_BODY}}
</body>
</html>"#;

fn apply_template(template: &str, title: &str, plot: &Plot) -> Vec<u8> {
    let plotly_head = Plot::online_cdn_js();
    let plotly_body = plot.to_inline_html(None);
    template
        .replace("{{TITLE}}", title)
        .replace("{{PLOTLY_HEAD}}", &plotly_head)
        .replace("{{PLOTLY_BODY}}", &plotly_body)
        .into_bytes()
}

trait Reporter {
    fn set_title(&mut self, title: &str);
    /// A layer's series with its peaks and troughs.
    fn add_layer(&mut self, layer: &LayerResult);
    /// Changepoint markers on the layer's series.
    fn add_change_points(&mut self, layer: &LayerResult);
    /// Returns of the series in a panel of their own.
    fn add_returns(&mut self, series: &Series);
    /// Per-step state of the online detector.
    fn add_diagnostics(&mut self, series: &Series, run: &BocpdRun);
    fn as_bytes(&self) -> Vec<u8>;
}

struct PlotlyReporter {
    plot: Plot,
    title: String,
    panels: Vec<String>,
}

impl PlotlyReporter {
    fn new() -> PlotlyReporter {
        let config = Configuration::default().responsive(true).fill_frame(false);
        let mut plot = Plot::new();
        plot.set_configuration(config);
        PlotlyReporter {
            plot,
            title: "Peaks and Troughs".to_string(),
            panels: vec!["Price".to_string()],
        }
    }

    /// Axis id of a new panel below the existing ones.
    fn add_panel(&mut self, title: &str) -> String {
        if self.panels.len() >= MAX_PANELS {
            log::warn!("Too many panels, drawing '{}' on the last one", title);
            return panel_axis(MAX_PANELS);
        }
        self.panels.push(title.to_string());
        panel_axis(self.panels.len())
    }

    fn x_labels(series: &Series, indices: impl IntoIterator<Item = usize>) -> Vec<String> {
        indices.into_iter().map(|i| series.label(i)).collect()
    }

    fn line_trace(
        series: &Series,
        values: Vec<f64>,
        offset: usize,
        name: &str,
        axis: &str,
    ) -> Box<Scatter<String, f64>> {
        let x = Self::x_labels(series, offset..offset + values.len());
        Scatter::new(x, values)
            .mode(Mode::Lines)
            .name(name)
            .line(Line::new().width(SERIES_LINE_WIDTH))
            .y_axis(axis)
    }

    fn marker_trace(
        series: &Series,
        indices: &[usize],
        name: &str,
        legend_group: &str,
        symbol: MarkerSymbol,
        color: &'static str,
    ) -> Box<Scatter<String, f64>> {
        let values = series.values();
        let (x, y): (Vec<String>, Vec<f64>) = indices
            .iter()
            .filter(|&&i| i < values.len())
            .map(|&i| (series.label(i), values[i]))
            .unzip();
        Scatter::new(x, y)
            .mode(Mode::Markers)
            .name(name)
            .legend_group(legend_group)
            .marker(Marker::new().symbol(symbol).color(color).size(MARKER_SIZE))
    }
}

fn panel_axis(panel: usize) -> String {
    if panel <= 1 {
        "y".to_string()
    } else {
        format!("y{}", panel)
    }
}

impl Reporter for PlotlyReporter {
    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    fn add_layer(&mut self, layer: &LayerResult) {
        let series = &layer.series;
        let group = layer.timeframe;
        let trace = Self::line_trace(series, series.values().to_vec(), 0, group, "y")
            .legend_group(group);
        self.plot.add_trace(trace);
        self.plot.add_trace(Self::marker_trace(
            series,
            &layer.extrema.peaks,
            &format!("{} peaks", group),
            group,
            MarkerSymbol::TriangleDown,
            PEAK_COLOR,
        ));
        self.plot.add_trace(Self::marker_trace(
            series,
            &layer.extrema.troughs,
            &format!("{} troughs", group),
            group,
            MarkerSymbol::TriangleUp,
            TROUGH_COLOR,
        ));
    }

    fn add_change_points(&mut self, layer: &LayerResult) {
        if layer.changepoints.is_empty() {
            return;
        }
        let series = &layer.series;
        let values = series.values();

        let mut x_coords = vec![];
        let mut y_coords = vec![];
        let mut hover_texts = vec![];
        let mut marker_colors = vec![];
        for cp in &layer.changepoints {
            let Some(&value) = values.get(cp.index) else {
                log::warn!(
                    "Change point index {} out of bounds for values (len={})",
                    cp.index,
                    values.len()
                );
                continue;
            };
            let color = match cp.direction {
                ChangeDirection::Increase => INCREASE_COLOR,
                ChangeDirection::Decrease => DECREASE_COLOR,
            };
            x_coords.push(series.label(cp.index));
            y_coords.push(value);
            hover_texts.push(change_point_hover(cp));
            marker_colors.push(color.to_string());
        }

        let trace = Scatter::new(x_coords, y_coords)
            .mode(Mode::Markers)
            .name(format!("{} changepoints", layer.timeframe))
            .legend_group(layer.timeframe)
            .marker(
                Marker::new()
                    .symbol(MarkerSymbol::Diamond)
                    .color_array(marker_colors)
                    .size(MARKER_SIZE),
            )
            .hover_text_array(hover_texts);
        self.plot.add_trace(trace);
    }

    fn add_returns(&mut self, series: &Series) {
        let axis = self.add_panel("Returns");
        let returns = series.log_returns();
        self.plot
            .add_trace(Self::line_trace(series, returns, 1, "returns", &axis));
    }

    fn add_diagnostics(&mut self, series: &Series, run: &BocpdRun) {
        self.plot.add_trace(Self::line_trace(
            series,
            series.values().to_vec(),
            0,
            "series",
            "y",
        ));

        let indices = run.trace.iter().map(|step| step.index).collect_vec();
        let x = Self::x_labels(series, indices.iter().copied());

        let score_axis = self.add_panel("Score");
        let scores = run.trace.iter().map(|step| step.score).collect_vec();
        self.plot.add_trace(
            Scatter::new(x.clone(), scores)
                .mode(Mode::Lines)
                .name("score")
                .y_axis(&score_axis),
        );

        let variance_axis = self.add_panel("Variance");
        let sigma2 = run.trace.iter().map(|step| step.sigma2).collect_vec();
        self.plot.add_trace(
            Scatter::new(x.clone(), sigma2)
                .mode(Mode::Lines)
                .name("sigma2")
                .y_axis(&variance_axis),
        );

        let reset_axis = self.add_panel("P(reset)");
        let reset = run
            .trace
            .iter()
            .map(|step| step.reset_probability)
            .collect_vec();
        self.plot.add_trace(
            Scatter::new(x, reset)
                .mode(Mode::Lines)
                .name("reset probability")
                .y_axis(&reset_axis),
        );

        let values = series.values();
        let (cx, cy): (Vec<String>, Vec<f64>) = run
            .changepoints
            .iter()
            .filter(|&&i| i < values.len())
            .map(|&i| (series.label(i), values[i]))
            .unzip();
        self.plot.add_trace(
            Scatter::new(cx, cy)
                .mode(Mode::Markers)
                .name("online changepoints")
                .marker(
                    Marker::new()
                        .symbol(MarkerSymbol::Diamond)
                        .color(INCREASE_COLOR)
                        .size(MARKER_SIZE),
                ),
        );
    }

    fn as_bytes(&self) -> Vec<u8> {
        let mut layout = Layout::new()
            .title(Title::from(self.title.as_str()))
            .legend(
                Legend::new()
                    .group_click(plotly::layout::GroupClick::ToggleItem)
                    .orientation(plotly::common::Orientation::Horizontal),
            );
        if self.panels.len() > 1 {
            layout = layout.grid(
                LayoutGrid::new()
                    .rows(self.panels.len())
                    .columns(1)
                    .pattern(GridPattern::Coupled),
            );
        }
        for (i, name) in self.panels.iter().enumerate() {
            let axis = Axis::new().title(Title::from(name.as_str()));
            layout = match i {
                0 => layout.y_axis(axis),
                1 => layout.y_axis2(axis),
                2 => layout.y_axis3(axis),
                _ => layout.y_axis4(axis),
            };
        }

        let mut plot = self.plot.clone();
        plot.set_layout(layout);
        apply_template(DEFAULT_HTML_TEMPLATE, &self.title, &plot)
    }
}

fn change_point_hover(cp: &ChangePoint) -> String {
    let direction = match cp.direction {
        ChangeDirection::Increase => "Increase",
        ChangeDirection::Decrease => "Decrease",
    };
    format!(
        "{}: {:+.1}%<br>Source: {}<br>Confidence: {:.1}%",
        direction,
        cp.magnitude_pct,
        cp.source.as_str(),
        cp.confidence * 100.0
    )
}

/// One tab separated output row.
struct CsvRow {
    timeframe: &'static str,
    index: usize,
    time: String,
    kind: &'static str,
    value: f64,
    source: Option<&'static str>,
    magnitude_pct: Option<f64>,
    confidence: Option<f64>,
}

impl CsvRow {
    const HEADER: &'static str =
        "timeframe\tindex\ttime\tkind\tvalue\tsource\tmagnitude_pct\tconfidence";

    fn to_csv_line(&self) -> String {
        let optional = |v: Option<f64>| v.map(|v| format!("{:.4}", v)).unwrap_or_default();
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.timeframe,
            self.index,
            self.time,
            self.kind,
            self.value,
            self.source.unwrap_or_default(),
            optional(self.magnitude_pct),
            optional(self.confidence),
        )
    }
}

struct CsvReporter {
    rows: Vec<CsvRow>,
}

impl CsvReporter {
    fn new() -> Self {
        CsvReporter { rows: Vec::new() }
    }
}

impl Reporter for CsvReporter {
    fn set_title(&mut self, _title: &str) {}

    fn add_layer(&mut self, layer: &LayerResult) {
        for point in layer.points() {
            self.rows.push(CsvRow {
                timeframe: layer.timeframe,
                index: point.index,
                time: layer.series.label(point.index),
                kind: match point.label {
                    ExtremaLabel::Peak => "peak",
                    ExtremaLabel::Trough => "trough",
                },
                value: point.value,
                source: None,
                magnitude_pct: None,
                confidence: None,
            });
        }
    }

    fn add_change_points(&mut self, layer: &LayerResult) {
        let values = layer.series.values();
        for cp in &layer.changepoints {
            let Some(&value) = values.get(cp.index) else {
                continue;
            };
            self.rows.push(CsvRow {
                timeframe: layer.timeframe,
                index: cp.index,
                time: layer.series.label(cp.index),
                kind: "changepoint",
                value,
                source: Some(cp.source.as_str()),
                magnitude_pct: Some(cp.magnitude_pct),
                confidence: Some(cp.confidence),
            });
        }
    }

    fn add_returns(&mut self, _series: &Series) {
        // Returns are derived data, rows only carry labelled points
    }

    fn add_diagnostics(&mut self, _series: &Series, _run: &BocpdRun) {
        // CSV reporter does not support diagnostics
    }

    fn as_bytes(&self) -> Vec<u8> {
        if self.rows.is_empty() {
            return Vec::new();
        }
        let mut lines = vec![CsvRow::HEADER.to_string()];
        lines.extend(
            self.rows
                .iter()
                .sorted_by_key(|row| (row.timeframe, row.index, row.kind))
                .map(CsvRow::to_csv_line),
        );
        let mut output = lines.join("\n");
        output.push('\n');
        output.into_bytes()
    }
}

struct ReporterFactory {}

impl ReporterFactory {
    fn from_file_name(path: &Path) -> Option<Box<dyn Reporter>> {
        if path == Path::new("-") {
            return Some(Box::new(CsvReporter::new()));
        }
        let extension = path.extension()?.to_ascii_lowercase();
        match extension.to_str()? {
            "html" => Some(Box::new(PlotlyReporter::new())),
            "csv" => Some(Box::new(CsvReporter::new())),
            _ => None,
        }
    }
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html"))
}

fn write_output(output: &Path, bytes: &[u8]) -> Result<()> {
    if output == Path::new("-") {
        match io::stdout().write_all(bytes) {
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
            res => res,
        }?;
    } else {
        File::create(output)
            .and_then(|mut file| file.write_all(bytes))
            .map_err(|e| anyhow!("Failed to write {}: {}", output.display(), e))?;
        log::info!("Wrote {}", output.display());
    }
    Ok(())
}

fn reporter_for(output: &Path) -> Result<Box<dyn Reporter>> {
    ReporterFactory::from_file_name(output).ok_or(anyhow!(
        "Could not infer output format of {}, use .html, .csv or -",
        output.display()
    ))
}

/// Write all layers of an analysis, changepoint layers with their markers.
pub fn report_analysis(output: &Path, report: &AnalysisReport) -> Result<()> {
    let mut reporter = reporter_for(output)?;
    reporter.set_title(&format!("{}: multi-timeframe peaks and troughs", report.symbol));
    for layer in report.layers() {
        reporter.add_layer(layer);
        reporter.add_change_points(layer);
    }
    write_output(output, &reporter.as_bytes())
}

/// Write a single detection with its returns panel.
pub fn report_detection(output: &Path, symbol: &str, layer: &LayerResult) -> Result<()> {
    let mut reporter = reporter_for(output)?;
    reporter.set_title(&format!("{}: {} changepoint analysis", symbol, layer.timeframe));
    reporter.add_layer(layer);
    reporter.add_change_points(layer);
    reporter.add_returns(&layer.series);
    write_output(output, &reporter.as_bytes())
}

/// Plot the score-driven model state of an online run.
pub fn report_diagnostics(output: &Path, series: &Series, run: &BocpdRun) -> Result<()> {
    if !is_html(output) {
        bail!("Diagnostics can only be rendered as HTML");
    }
    let mut reporter = reporter_for(output)?;
    reporter.set_title("Score-driven model diagnostics");
    reporter.add_diagnostics(series, run);
    write_output(output, &reporter.as_bytes())
}

/// Chunk means, to fit a long series into a sparkline.
fn downsample(values: &[f64], width: usize) -> Vec<f64> {
    if values.len() <= width || width == 0 {
        return values.to_vec();
    }
    let chunk = values.len().div_ceil(width);
    values
        .chunks(chunk)
        .map(|c| c.iter().sum::<f64>() / c.len() as f64)
        .collect()
}

fn layer_summary(layer: &LayerResult) -> String {
    let mut lines = vec![format!(
        "{}: {} points, {} changepoints, {} peaks, {} troughs",
        layer.timeframe,
        Unsigned::from(layer.series.len()),
        Unsigned::from(layer.changepoints.len()),
        Unsigned::from(layer.extrema.peaks.len()),
        Unsigned::from(layer.extrema.troughs.len()),
    )];
    if !layer.series.is_empty() {
        let values = layer.series.values();
        let median = values.to_vec().median().unwrap_or_default();
        lines.push(format!(
            "  {} median: {}",
            aggregate(values.iter().copied()),
            Float::from(median)
        ));
        lines.push(format!("  {}", spark(&downsample(values, SPARKLINE_WIDTH))));
    }
    for point in layer.points() {
        let label = match point.label {
            ExtremaLabel::Peak => "peak",
            ExtremaLabel::Trough => "trough",
        };
        lines.push(format!(
            "  {:<7}{:>16}  {}",
            label,
            layer.series.label(point.index),
            Float::from(point.value)
        ));
    }
    lines.join("\n")
}

/// Counts, shape and labelled points of every layer.
pub fn text_summary(symbol: &str, layers: &[&LayerResult]) -> String {
    let mut out = format!("{}\n", symbol);
    for layer in layers {
        out.push_str(&layer_summary(layer));
        out.push('\n');
    }
    out
}

pub fn json_summary<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
