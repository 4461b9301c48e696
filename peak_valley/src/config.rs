use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use config::{Config, ConfigError, File, FileFormat};
use serde::de::DeserializeOwned;
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::analysis::IntradaySettings;
use crate::extrema::ExtremaClassifier;
use crate::hybrid::HybridConfig;
use crate::segmentation::Stopping;
use peak_valley_cli_types::{CliExtrema, CliSettings, DetectionRule, Timeframe};

const LOCAL_CONFIG_NAME: &str = ".peakvalleyconfig";

/// Files the configuration is assembled from, lowest precedence first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSources {
    pub system: Option<PathBuf>,
    pub local: Option<PathBuf>,
    pub explicit: Option<PathBuf>,
}

impl ConfigSources {
    /// Locate the user-wide and the nearest local configuration.
    pub fn discover(explicit: Option<&Path>) -> Self {
        ConfigSources {
            system: system_config_path(),
            local: env::current_dir()
                .ok()
                .and_then(|dir| find_local_config(&dir)),
            explicit: explicit.map(Path::to_path_buf),
        }
    }

    /// Paths that exist, lowest precedence first.
    pub fn existing(&self) -> Vec<&Path> {
        [&self.system, &self.local, &self.explicit]
            .into_iter()
            .flatten()
            .map(PathBuf::as_path)
            .filter(|p| p.is_file())
            .collect()
    }
}

/// `$XDG_CONFIG_HOME/peak-valley/config.toml`, or the same below
/// `~/.config`.
pub fn system_config_path() -> Option<PathBuf> {
    if let Ok(xdg_config_home) = env::var("XDG_CONFIG_HOME") {
        return Some(
            Path::new(&xdg_config_home)
                .join("peak-valley")
                .join("config.toml"),
        );
    }
    dirs_next::home_dir().map(|home| {
        home.join(".config")
            .join("peak-valley")
            .join("config.toml")
    })
}

/// Nearest `.peakvalleyconfig` in `start` or one of its ancestors.
pub fn find_local_config(start: &Path) -> Option<PathBuf> {
    let mut current_dir = start.to_path_buf();
    loop {
        let candidate = current_dir.join(LOCAL_CONFIG_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current_dir.pop() {
            return None;
        }
    }
}

/// Read hierarchical configuration (system -> local -> explicit)
pub fn read_hierarchical_config(sources: &ConfigSources) -> Result<Config, ConfigError> {
    let mut builder = Config::builder();

    if let Some(system) = &sources.system {
        builder = builder.add_source(
            File::from(system.as_path())
                .format(FileFormat::Toml)
                .required(false),
        );
    }
    if let Some(local) = &sources.local {
        builder = builder.add_source(
            File::from(local.as_path())
                .format(FileFormat::Toml)
                .required(false),
        );
    }
    // An explicitly named file has to exist
    if let Some(explicit) = &sources.explicit {
        builder = builder.add_source(
            File::from(explicit.as_path())
                .format(FileFormat::Toml)
                .required(true),
        );
    }

    builder.build()
}

pub fn timeframe_key(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::Weekly => "weekly",
        Timeframe::Daily => "daily",
        Timeframe::Intraday => "intraday",
    }
}

/// Resolved view on the configuration files.
///
/// A lookup tries `timeframe.<name>.<key>` before the global `<key>`.
#[derive(Debug, Clone)]
pub struct Settings {
    config: Config,
    sources: ConfigSources,
}

impl Settings {
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::from_sources(ConfigSources::discover(explicit))
    }

    pub fn from_sources(sources: ConfigSources) -> Result<Self> {
        let config = read_hierarchical_config(&sources).context("Failed to read configuration")?;
        Ok(Settings { config, sources })
    }

    pub fn sources(&self) -> &ConfigSources {
        &self.sources
    }

    /// Timeframe-specific value first, then the global one.
    ///
    /// A missing key is `None`; a value of the wrong type is an error.
    pub fn get<T: DeserializeOwned>(&self, timeframe: Timeframe, key: &str) -> Result<Option<T>> {
        let specific = format!("timeframe.{}.{}", timeframe_key(timeframe), key);
        for candidate in [specific.as_str(), key] {
            match self.config.get::<T>(candidate) {
                Ok(value) => return Ok(Some(value)),
                Err(ConfigError::NotFound(_)) => {}
                Err(e) => return Err(anyhow!("Invalid value for '{}': {}", candidate, e)),
            }
        }
        Ok(None)
    }

    fn set<T: DeserializeOwned>(
        &self,
        timeframe: Timeframe,
        key: &str,
        target: &mut T,
    ) -> Result<()> {
        if let Some(value) = self.get(timeframe, key)? {
            *target = value;
        }
        Ok(())
    }

    /// Detector configuration for a timeframe.
    ///
    /// Precedence: CLI flag, timeframe override, global key, built-in default.
    /// The result is validated.
    pub fn hybrid_config(
        &self,
        timeframe: Timeframe,
        cli: &CliSettings,
        extrema: &CliExtrema,
    ) -> Result<HybridConfig> {
        let mut hybrid = HybridConfig::default();
        let tf = timeframe;

        let gas = &mut hybrid.bocpd.gas;
        self.set(tf, "gas.nu", &mut gas.nu)?;
        self.set(tf, "gas.omega", &mut gas.omega)?;
        self.set(tf, "gas.alpha", &mut gas.alpha)?;
        self.set(tf, "gas.beta", &mut gas.beta)?;
        // Zero pins the location at the origin
        if let Some(lambda) = self.get::<f64>(tf, "gas.mean_smoothing")? {
            gas.mean_smoothing = (lambda != 0.0).then_some(lambda);
        }

        let bocpd = &mut hybrid.bocpd;
        self.set(tf, "gas.warmup", &mut bocpd.warmup)?;
        self.set(tf, "bocpd.hazard_rate", &mut bocpd.hazard_rate)?;
        self.set(tf, "bocpd.threshold", &mut bocpd.threshold)?;
        self.set(tf, "bocpd.prune_threshold", &mut bocpd.prune_threshold)?;
        self.set(tf, "bocpd.max_hypotheses", &mut bocpd.max_hypotheses)?;
        self.set(tf, "bocpd.confirm", &mut bocpd.confirm)?;
        self.set(tf, "bocpd.min_drop", &mut bocpd.min_drop)?;
        if let Some(rule) = self.get::<String>(tf, "bocpd.rule")? {
            bocpd.rule = parse_rule(&rule)?;
        }
        if let Some(rule) = cli.rule {
            bocpd.rule = rule;
        }

        if let Some(n_bkps) = self.get::<usize>(tf, "segmentation.n_bkps")? {
            hybrid.exact.stopping = Stopping::Count(n_bkps);
        }
        if let Some(penalty) = self.get::<f64>(tf, "segmentation.penalty")? {
            hybrid.greedy.stopping = Stopping::Penalty(penalty);
        }
        self.set(tf, "segmentation.min_size", &mut hybrid.exact.min_size)?;
        self.set(tf, "segmentation.greedy_min_size", &mut hybrid.greedy.min_size)?;
        self.set(tf, "segmentation.exact_max_len", &mut hybrid.exact.max_len)?;
        if let Some(ms) = self.get::<u64>(tf, "segmentation.time_budget_ms")? {
            // Zero lifts the limit
            let budget = (ms > 0).then(|| Duration::from_millis(ms));
            hybrid.exact.time_budget = budget;
            hybrid.greedy.time_budget = budget;
        }

        self.set(tf, "volatility.window", &mut hybrid.volatility.window)?;
        self.set(tf, "volatility.k_sigma", &mut hybrid.volatility.k_sigma)?;
        self.set(tf, "hybrid.min_separation", &mut hybrid.min_separation)?;
        hybrid.boundary_margin = self.extrema(tf, extrema)?.window;

        self.set(tf, "validation.strict", &mut hybrid.strict)?;
        hybrid.strict |= cli.strict;

        hybrid.validate()?;
        Ok(hybrid)
    }

    /// Classifier for a timeframe; a CLI window wins over the files.
    pub fn extrema(&self, timeframe: Timeframe, cli: &CliExtrema) -> Result<ExtremaClassifier> {
        let mut classifier = ExtremaClassifier::default();
        self.set(timeframe, "extrema.window", &mut classifier.window)?;
        self.set(timeframe, "extrema.check_right", &mut classifier.check_right)?;
        if let Some(window) = cli.window {
            classifier.window = window;
        }
        classifier.check_right |= cli.check_right;
        Ok(classifier)
    }

    pub fn intraday(&self) -> Result<IntradaySettings> {
        let mut settings = IntradaySettings::default();
        let tf = Timeframe::Intraday;
        self.set(tf, "intraday.atr_period", &mut settings.atr_period)?;
        self.set(tf, "intraday.atr_multiplier", &mut settings.atr_multiplier)?;
        self.set(tf, "intraday.peak_distance", &mut settings.peak_distance)?;
        if settings.atr_period == 0 {
            return Err(anyhow!("intraday.atr_period must be positive"));
        }
        Ok(settings)
    }
}

/// Accepts `reset_probability`, `reset-probability`, `map_drop` and
/// `map-drop`.
fn parse_rule(value: &str) -> Result<DetectionRule> {
    DetectionRule::from_str(&value.replace('_', "-"), true)
        .map_err(|_| {
            anyhow!(
                "Invalid bocpd.rule: {}. Valid values are 'reset_probability' or 'map_drop'",
                value
            )
        })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::DetectionError;
    use std::fs;
    use tempfile::TempDir;

    fn cli_settings() -> CliSettings {
        CliSettings {
            config: None,
            strict: false,
            rule: None,
        }
    }

    fn cli_extrema() -> CliExtrema {
        CliExtrema {
            window: None,
            check_right: false,
        }
    }

    fn settings_from(files: &[(&str, &str)]) -> (TempDir, Settings) {
        let temp_dir = TempDir::new().unwrap();
        let mut sources = ConfigSources::default();
        for (name, content) in files {
            let path = temp_dir.path().join(name);
            fs::write(&path, content).unwrap();
            match *name {
                "system.toml" => sources.system = Some(path),
                "explicit.toml" => sources.explicit = Some(path),
                _ => sources.local = Some(path),
            }
        }
        let settings = Settings::from_sources(sources).unwrap();
        (temp_dir, settings)
    }

    #[test]
    fn test_defaults_without_files() {
        let (_dir, settings) = settings_from(&[]);
        let hybrid = settings
            .hybrid_config(Timeframe::Weekly, &cli_settings(), &cli_extrema())
            .unwrap();
        assert_eq!(hybrid.bocpd.gas.nu, 4.0);
        assert_eq!(hybrid.bocpd.hazard_rate, 1.0 / 25.0);
        assert_eq!(hybrid.bocpd.threshold, 0.3);
        assert_eq!(hybrid.boundary_margin, 2);
        assert!(!hybrid.strict);
        let classifier = settings.extrema(Timeframe::Weekly, &cli_extrema()).unwrap();
        assert_eq!(classifier, ExtremaClassifier::default());
    }

    #[test]
    fn test_layering_and_timeframe_overrides() {
        let system = r#"
[gas]
nu = 6.0
alpha = 0.05

[bocpd]
threshold = 0.5
"#;
        let local = r#"
[gas]
nu = 5.0

[bocpd]
rule = "map_drop"

[timeframe.daily.bocpd]
threshold = 0.7

[timeframe.daily.extrema]
window = 4
"#;
        let (_dir, settings) = settings_from(&[("system.toml", system), (LOCAL_CONFIG_NAME, local)]);

        let weekly = settings
            .hybrid_config(Timeframe::Weekly, &cli_settings(), &cli_extrema())
            .unwrap();
        assert_eq!(weekly.bocpd.gas.nu, 5.0);
        assert_eq!(weekly.bocpd.gas.alpha, 0.05);
        assert_eq!(weekly.bocpd.threshold, 0.5);
        assert_eq!(weekly.bocpd.rule, DetectionRule::MapDrop);
        assert_eq!(weekly.boundary_margin, 2);

        let daily = settings
            .hybrid_config(Timeframe::Daily, &cli_settings(), &cli_extrema())
            .unwrap();
        assert_eq!(daily.bocpd.threshold, 0.7);
        assert_eq!(daily.boundary_margin, 4);
    }

    #[test]
    fn test_cli_takes_precedence() {
        let local = r#"
[bocpd]
rule = "map_drop"

[extrema]
window = 4
check_right = false
"#;
        let (_dir, settings) = settings_from(&[(LOCAL_CONFIG_NAME, local)]);
        let cli = CliSettings {
            rule: Some(DetectionRule::ResetProbability),
            ..cli_settings()
        };
        let extrema = CliExtrema {
            window: Some(1),
            check_right: true,
        };
        let hybrid = settings
            .hybrid_config(Timeframe::Weekly, &cli, &extrema)
            .unwrap();
        assert_eq!(hybrid.bocpd.rule, DetectionRule::ResetProbability);
        assert_eq!(hybrid.boundary_margin, 1);
        let classifier = settings.extrema(Timeframe::Weekly, &extrema).unwrap();
        assert_eq!(classifier, ExtremaClassifier::new(1, true));
    }

    #[test]
    fn test_explicit_file_overrides_local() {
        let (_dir, settings) = settings_from(&[
            (LOCAL_CONFIG_NAME, "[segmentation]\nn_bkps = 4\n"),
            ("explicit.toml", "[segmentation]\nn_bkps = 7\ntime_budget_ms = 0\n"),
        ]);
        let hybrid = settings
            .hybrid_config(Timeframe::Weekly, &cli_settings(), &cli_extrema())
            .unwrap();
        assert_eq!(hybrid.exact.stopping, Stopping::Count(7));
        assert_eq!(hybrid.exact.time_budget, None);
        assert_eq!(settings.sources().existing().len(), 2);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let sources = ConfigSources {
            explicit: Some(temp_dir.path().join("nope.toml")),
            ..Default::default()
        };
        assert!(Settings::from_sources(sources).is_err());
    }

    #[test]
    fn test_strict_validation() {
        let local = "[gas]\nalpha = 0.2\nbeta = 0.85\n";
        let (_dir, settings) = settings_from(&[(LOCAL_CONFIG_NAME, local)]);
        assert!(settings
            .hybrid_config(Timeframe::Weekly, &cli_settings(), &cli_extrema())
            .is_ok());

        let strict = CliSettings {
            strict: true,
            ..cli_settings()
        };
        let err = settings
            .hybrid_config(Timeframe::Weekly, &strict, &cli_extrema())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DetectionError>(),
            Some(DetectionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let (_dir, settings) = settings_from(&[(LOCAL_CONFIG_NAME, "[gas]\nnu = \"many\"\n")]);
        let err = settings
            .hybrid_config(Timeframe::Weekly, &cli_settings(), &cli_extrema())
            .unwrap_err();
        assert!(err.to_string().contains("gas.nu"), "{err}");

        let (_dir, settings) = settings_from(&[(LOCAL_CONFIG_NAME, "[bocpd]\nrule = \"sometimes\"\n")]);
        assert!(settings
            .hybrid_config(Timeframe::Weekly, &cli_settings(), &cli_extrema())
            .is_err());
    }

    #[test]
    fn test_intraday_settings() {
        let local = "[intraday]\natr_period = 10\n\n[timeframe.intraday.intraday]\npeak_distance = 3\n";
        let (_dir, settings) = settings_from(&[(LOCAL_CONFIG_NAME, local)]);
        let intraday = settings.intraday().unwrap();
        assert_eq!(intraday.atr_period, 10);
        assert_eq!(intraday.peak_distance, 3);
        assert_eq!(intraday.atr_multiplier, crate::defaults::DEFAULT_ATR_MULTIPLIER);
    }

    #[test]
    fn test_find_local_config_upward_search() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_local_config(&nested), None);

        let config_path = temp_dir.path().join(LOCAL_CONFIG_NAME);
        fs::write(&config_path, "").unwrap();
        assert_eq!(find_local_config(&nested), Some(config_path));
    }

    #[test]
    fn test_parse_rule() {
        assert_eq!(parse_rule("reset_probability").unwrap(), DetectionRule::ResetProbability);
        assert_eq!(parse_rule("map-drop").unwrap(), DetectionRule::MapDrop);
        assert!(parse_rule("never").is_err());
    }
}
