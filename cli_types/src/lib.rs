use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timeframe {
    Weekly,
    Daily,
    Intraday,
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(Timeframe::Weekly),
            "daily" => Ok(Timeframe::Daily),
            "intraday" | "60min" => Ok(Timeframe::Intraday),
            _ => Err(anyhow!(
                "Invalid timeframe: {}. Valid values are 'weekly', 'daily' or 'intraday'",
                s
            )),
        }
    }
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum DetectionRule {
    /// Declare a changepoint when the reset probability exceeds the threshold
    #[value(name = "reset-probability")]
    ResetProbability,
    /// Declare a changepoint when the most probable run length collapses
    #[value(name = "map-drop")]
    MapDrop,
}

#[derive(Parser)]
#[command(version, name = "peak-valley")]
pub struct Cli {
    /// Increase verbosity level (can be specified multiple times.) The first level sets level
    /// "info", second sets level "debug", and third sets level "trace" for the logger.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that classifies changepoints.
#[derive(Args, Clone, Debug)]
pub struct CliExtrema {
    /// Number of neighbouring points compared when labelling a changepoint
    /// as peak or trough. Falls back to the configuration file, then to 2.
    #[arg(short, long)]
    pub window: Option<usize>,

    /// Also require the changepoint to dominate the points after it.
    /// Delays confirmation by `window` bars in exchange for fewer false extrema.
    #[arg(long)]
    pub check_right: bool,
}

/// Options controlling where detection settings come from.
#[derive(Args, Clone, Debug)]
pub struct CliSettings {
    /// Configuration file taking precedence over `.peakvalleyconfig` and the
    /// user-wide configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Reject ill-defined model parameters (nu <= 2, alpha + beta >= 1)
    /// instead of warning about them
    #[arg(long)]
    pub strict: bool,

    /// Override the primary BOCPD detection rule
    #[arg(long, value_enum)]
    pub rule: Option<DetectionRule>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the multi-timeframe analysis: weekly changepoints classified as
    /// macro peaks/troughs, daily local extrema and, if intraday bars are
    /// given, volatility-filtered intraday extrema.
    ///
    /// The weekly series is derived from the daily bars by taking the last
    /// close of every week.
    Analyze {
        /// CSV file with daily bars (columns: date, close and optionally high, low)
        #[arg(short, long)]
        daily: PathBuf,

        /// CSV file with intraday bars (columns: datetime, close, high, low)
        #[arg(short, long)]
        intraday: Option<PathBuf>,

        /// Name of the instrument, used in titles and the summary
        #[arg(short, long, default_value = "series")]
        symbol: String,

        /// Report output. `.html` renders a chart, `.csv` writes the labelled
        /// points, `-` writes tab separated rows to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Format of the summary printed to stdout
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Half-width of the daily local extrema search
        #[arg(long, default_value = "12")]
        order: usize,

        #[command(flatten)]
        extrema: CliExtrema,

        #[command(flatten)]
        settings: CliSettings,
    },

    /// Detect changepoints in a single series and classify them as peaks or
    /// troughs.
    ///
    /// Detection runs the exact segmenter first, falls back to greedy
    /// bottom-up merging, merges the result with the score-driven BOCPD
    /// output and only resorts to the rolling volatility detector when both
    /// statistical methods find nothing.
    Detect {
        /// CSV file with the series (columns: date, close)
        #[arg(short, long)]
        input: PathBuf,

        /// Timeframe whose configuration overrides apply
        #[arg(short, long, value_enum, default_value = "weekly")]
        timeframe: Timeframe,

        /// Report output. `.html` renders a chart, `.csv` writes the labelled
        /// points, `-` writes tab separated rows to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Format of the summary printed to stdout
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        #[command(flatten)]
        extrema: CliExtrema,

        #[command(flatten)]
        settings: CliSettings,
    },

    /// Plot the score-driven model state (scores, dynamic variance and
    /// reset probability) of the online detector over a series
    Diagnostics {
        /// CSV file with the series (columns: date, close)
        #[arg(short, long)]
        input: PathBuf,

        /// HTML output file
        #[arg(short, long, default_value = "diagnostics.html")]
        output: PathBuf,

        /// Timeframe whose configuration overrides apply
        #[arg(short, long, value_enum, default_value = "weekly")]
        timeframe: Timeframe,

        #[command(flatten)]
        settings: CliSettings,
    },

    /// Show which configuration files are in effect and the resulting
    /// detector settings
    Config {
        /// Configuration file taking precedence over the discovered ones
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[cfg(test)]
mod test {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert()
    }

    #[test]
    fn verify_timeframe_parsing() {
        assert_eq!("weekly".parse::<Timeframe>().unwrap(), Timeframe::Weekly);
        assert_eq!("daily".parse::<Timeframe>().unwrap(), Timeframe::Daily);
        assert_eq!("60min".parse::<Timeframe>().unwrap(), Timeframe::Intraday);
        assert!("hourly".parse::<Timeframe>().is_err());
    }

    #[test]
    fn verify_detect_defaults() {
        let cli = Cli::try_parse_from(["peak-valley", "detect", "--input", "x.csv"]).unwrap();
        match cli.command {
            Commands::Detect {
                timeframe,
                format,
                extrema,
                settings,
                ..
            } => {
                assert_eq!(timeframe, Timeframe::Weekly);
                assert_eq!(format, OutputFormat::Text);
                assert_eq!(extrema.window, None);
                assert!(!extrema.check_right);
                assert!(!settings.strict);
                assert!(settings.rule.is_none());
            }
            _ => panic!("expected detect command"),
        }
    }
}
