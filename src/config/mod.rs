use crate::alerts::RearmPolicy;
use crate::error::EngineError;
use crate::indicators::IndicatorKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "cryptoanalyzer";
const ENV_PREFIX: &str = "CRYPTOANALYZER";

/// Terminal colour scheme
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

/// Indicator periods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    pub moving_averages: Vec<usize>,
    /// Lookback for the percent-change metric
    pub change_lookback_hours: u64,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_k: 2.0,
            moving_averages: vec![7, 30, 50],
            change_lookback_hours: 24,
        }
    }
}

impl IndicatorSettings {
    /// Indicator strategies computed for every asset
    pub fn kinds(&self) -> Vec<IndicatorKind> {
        let mut kinds: Vec<IndicatorKind> = self
            .moving_averages
            .iter()
            .map(|&period| IndicatorKind::MovingAverage { period })
            .collect();

        kinds.push(IndicatorKind::Rsi {
            period: self.rsi_period,
        });
        kinds.push(IndicatorKind::Macd {
            fast: self.macd_fast,
            slow: self.macd_slow,
            signal: self.macd_signal,
        });
        kinds.push(IndicatorKind::Bollinger {
            period: self.bollinger_period,
            k: self.bollinger_k,
        });

        kinds
    }

    /// Longest history any configured indicator needs
    pub fn max_required(&self) -> usize {
        self.kinds()
            .iter()
            .map(|k| k.required_observations())
            .max()
            .unwrap_or(0)
    }

    pub fn change_lookback(&self) -> Result<chrono::Duration, EngineError> {
        i64::try_from(self.change_lookback_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .ok_or_else(|| {
                EngineError::configuration(format!(
                    "change_lookback_hours {} is out of range",
                    self.change_lookback_hours
                ))
            })
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for kind in self.kinds() {
            kind.validate()?;
        }

        if self.change_lookback_hours == 0 {
            return Err(EngineError::configuration(
                "change_lookback_hours must be at least 1",
            ));
        }
        self.change_lookback()?;

        Ok(())
    }
}

/// CoinGecko data source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub base_url: String,
    /// Demo API key, sent as `x_cg_demo_api_key` when present
    pub api_key: Option<String>,
    pub vs_currency: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: crate::api::coingecko::COINGECKO_API_BASE.to_string(),
            api_key: None,
            vs_currency: "usd".to_string(),
        }
    }
}

/// Engine settings, read once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seconds between refresh cycles
    pub refresh_interval_secs: u64,
    /// Per-asset fetch timeout in seconds
    pub fetch_timeout_secs: u64,
    /// Observations kept per asset
    pub cache_capacity: usize,
    /// Assets tracked in addition to those in holdings and alert rules
    pub assets: Vec<String>,
    pub indicators: IndicatorSettings,
    pub rearm_policy: RearmPolicy,
    pub theme: Theme,
    pub source: SourceSettings,
    /// Optional Redis URL for the observation store
    pub redis_url: Option<String>,
    pub holdings_path: Option<PathBuf>,
    pub alerts_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            fetch_timeout_secs: 10,
            cache_capacity: 1000,
            assets: vec!["bitcoin".to_string(), "ethereum".to_string()],
            indicators: IndicatorSettings::default(),
            rearm_policy: RearmPolicy::Auto,
            theme: Theme::Dark,
            source: SourceSettings::default(),
            redis_url: None,
            holdings_path: None,
            alerts_path: None,
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file and `CRYPTOANALYZER__*` env vars
    ///
    /// Without an explicit path, `cryptoanalyzer.toml` in the working
    /// directory is used if present.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("assets")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject invalid values instead of clamping them
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.refresh_interval_secs == 0 {
            return Err(EngineError::configuration("refresh_interval_secs must be at least 1"));
        }

        if self.fetch_timeout_secs == 0 {
            return Err(EngineError::configuration("fetch_timeout_secs must be at least 1"));
        }

        self.indicators.validate()?;

        let required = self.indicators.max_required();
        if self.cache_capacity < required {
            return Err(EngineError::configuration(format!(
                "cache_capacity {} cannot hold the {} observations the indicators need",
                self.cache_capacity, required
            )));
        }

        if self.assets.iter().any(|a| a.trim().is_empty()) {
            return Err(EngineError::configuration("asset symbols must not be empty"));
        }

        self.lookback()?;

        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Span of history the cache can hold at the configured cadence
    pub fn lookback(&self) -> Result<chrono::Duration, EngineError> {
        let interval = i64::try_from(self.refresh_interval_secs).ok();
        let capacity = i64::try_from(self.cache_capacity).ok();

        interval
            .zip(capacity)
            .and_then(|(interval, capacity)| interval.checked_mul(capacity))
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                EngineError::configuration(format!(
                    "refresh_interval_secs {} x cache_capacity {} is out of range",
                    self.refresh_interval_secs, self.cache_capacity
                ))
            })
    }
}
