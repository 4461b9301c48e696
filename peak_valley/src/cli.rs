use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::Level;

use crate::analysis::{analyze, changepoint_layer, AnalysisSettings, LayerResult};
use crate::config::{timeframe_key, Settings};
use crate::data::{load_bars, load_series};
use crate::hybrid::HybridChangePointDetector;
use crate::reporting::{
    json_summary, report_analysis, report_detection, report_diagnostics, text_summary,
};
use peak_valley_cli_types::{
    Cli, CliExtrema, CliSettings, Commands, OutputFormat, Timeframe,
};

pub fn handle_calls() -> Result<()> {
    let cli = Cli::parse();
    let logger_level = match cli.verbose {
        0 => Level::Warn,
        1 => Level::Info,
        2 => Level::Debug,
        _ => Level::Trace,
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(logger_level.as_str())).init();

    match cli.command {
        Commands::Analyze {
            daily,
            intraday,
            symbol,
            output,
            format,
            order,
            extrema,
            settings,
        } => run_analyze(
            &daily,
            intraday.as_deref(),
            &symbol,
            output.as_deref(),
            format,
            order,
            &extrema,
            &settings,
        ),
        Commands::Detect {
            input,
            timeframe,
            output,
            format,
            extrema,
            settings,
        } => run_detect(
            &input,
            timeframe,
            output.as_deref(),
            format,
            &extrema,
            &settings,
        ),
        Commands::Diagnostics {
            input,
            output,
            timeframe,
            settings,
        } => run_diagnostics(&input, &output, timeframe, &settings),
        Commands::Config { config } => show_config_info(config),
    }
}

fn detector_for(
    settings: &Settings,
    timeframe: Timeframe,
    cli: &CliSettings,
    extrema: &CliExtrema,
) -> Result<HybridChangePointDetector> {
    let config = settings
        .hybrid_config(timeframe, cli, extrema)
        .with_context(|| format!("Invalid {} detector settings", timeframe_key(timeframe)))?;
    Ok(HybridChangePointDetector::new(config)?)
}

#[allow(clippy::too_many_arguments)]
fn run_analyze(
    daily: &Path,
    intraday: Option<&Path>,
    symbol: &str,
    output: Option<&Path>,
    format: OutputFormat,
    order: usize,
    extrema: &CliExtrema,
    cli: &CliSettings,
) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let analysis_settings = AnalysisSettings {
        detector: detector_for(&settings, Timeframe::Weekly, cli, extrema)?,
        classifier: settings.extrema(Timeframe::Weekly, extrema)?,
        daily_order: order,
        intraday: settings.intraday()?,
    };

    let daily_bars = load_bars(daily)?;
    let intraday_bars = intraday.map(load_bars).transpose()?;
    let report = analyze(symbol, &daily_bars, intraday_bars.as_ref(), &analysis_settings)?;

    match format {
        OutputFormat::Text => print!("{}", text_summary(symbol, &report.layers())),
        OutputFormat::Json => println!("{}", json_summary(&report)?),
    }
    if let Some(output) = output {
        report_analysis(output, &report)?;
    }
    Ok(())
}

fn run_detect(
    input: &Path,
    timeframe: Timeframe,
    output: Option<&Path>,
    format: OutputFormat,
    extrema: &CliExtrema,
    cli: &CliSettings,
) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let detector = detector_for(&settings, timeframe, cli, extrema)?;
    let classifier = settings.extrema(timeframe, extrema)?;

    let series = load_series(input)?;
    let layer = changepoint_layer(timeframe_key(timeframe), series, &detector, &classifier)?;
    let symbol = symbol_of(input);

    print_layer(&symbol, &layer, format)?;
    if let Some(output) = output {
        report_detection(output, &symbol, &layer)?;
    }
    Ok(())
}

fn print_layer(symbol: &str, layer: &LayerResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => print!("{}", text_summary(symbol, &[layer])),
        OutputFormat::Json => println!("{}", json_summary(layer)?),
    }
    Ok(())
}

fn run_diagnostics(
    input: &Path,
    output: &Path,
    timeframe: Timeframe,
    cli: &CliSettings,
) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let no_extrema = CliExtrema {
        window: None,
        check_right: false,
    };
    let detector = detector_for(&settings, timeframe, cli, &no_extrema)?;

    let series = load_series(input)?;
    let run = detector.engine().run_with_trace(series.values());
    log::info!(
        "Online detector: {} changepoints over {} steps",
        run.changepoints.len(),
        run.trace.len()
    );
    report_diagnostics(output, &series, &run)
}

/// File stem of the input, used as the symbol of a single series.
fn symbol_of(input: &Path) -> String {
    input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "series".to_string())
}

fn show_config_info(explicit: Option<PathBuf>) -> Result<()> {
    println!("Peak-Valley Configuration Information");
    println!("=====================================");

    let settings = Settings::load(explicit.as_deref())?;
    let sources = settings.sources();
    for (name, path) in [
        ("System config", &sources.system),
        ("Local config", &sources.local),
        ("Explicit config", &sources.explicit),
    ] {
        match path {
            Some(path) if path.is_file() => println!("{}: {} (exists)", name, path.display()),
            Some(path) => println!("{}: {} (not found)", name, path.display()),
            None => println!("{}: none", name),
        }
    }

    let cli = CliSettings {
        config: explicit,
        strict: false,
        rule: None,
    };
    let extrema = CliExtrema {
        window: None,
        check_right: false,
    };
    for timeframe in [Timeframe::Weekly, Timeframe::Daily, Timeframe::Intraday] {
        let hybrid = settings.hybrid_config(timeframe, &cli, &extrema)?;
        let classifier = settings.extrema(timeframe, &extrema)?;
        println!();
        println!("[{}]", timeframe_key(timeframe));
        println!("{:#?}", hybrid);
        println!("{:#?}", classifier);
    }
    println!();
    println!("{:#?}", settings.intraday()?);
    Ok(())
}
