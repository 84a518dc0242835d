use super::bollinger::{BollingerBands, BollingerState};
use super::macd::{MacdState, MacdValue};
use super::moving_average::SlidingMean;
use super::rsi::WilderRsi;
use super::Reading;
use crate::cache::AssetSeries;
use crate::config::IndicatorSettings;
use crate::error::EngineError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Which indicator a state slot computes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndicatorKind {
    MovingAverage { period: usize },
    Rsi { period: usize },
    Macd { fast: usize, slow: usize, signal: usize },
    Bollinger { period: usize, k: f64 },
}

impl IndicatorKind {
    /// Observations needed before the indicator produces a value
    pub fn required_observations(&self) -> usize {
        match *self {
            Self::MovingAverage { period } | Self::Bollinger { period, .. } => period,
            Self::Rsi { period } => period + 1,
            Self::Macd { fast, slow, signal } => fast.max(slow) + signal - 1,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        match *self {
            Self::MovingAverage { period } | Self::Rsi { period } if period == 0 => Err(
                EngineError::configuration(format!("{} period must be at least 1", self)),
            ),
            Self::Macd { fast, slow, signal } if fast == 0 || signal == 0 || fast >= slow => {
                Err(EngineError::configuration(format!(
                    "MACD periods must satisfy 0 < fast < slow and signal > 0, got {}",
                    self
                )))
            }
            Self::Bollinger { period, k } if period < 2 || !k.is_finite() || k <= 0.0 => {
                Err(EngineError::configuration(format!(
                    "Bollinger needs period >= 2 and a positive multiplier, got {}",
                    self
                )))
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MovingAverage { period } => write!(f, "MA({})", period),
            Self::Rsi { period } => write!(f, "RSI({})", period),
            Self::Macd { fast, slow, signal } => write!(f, "MACD({},{},{})", fast, slow, signal),
            Self::Bollinger { period, k } => write!(f, "BB({},{})", period, k),
        }
    }
}

/// Per-asset state of one indicator strategy
///
/// Every variant implements the same recompute capability; the EMA family
/// and moving averages advance incrementally, Bollinger works on its
/// trailing window. Adding an indicator means adding a variant here.
#[derive(Debug, Clone)]
pub enum IndicatorState {
    MovingAverage(SlidingMean),
    Rsi(WilderRsi),
    Macd(MacdState),
    Bollinger(BollingerState),
}

impl IndicatorState {
    pub fn new(kind: IndicatorKind) -> Self {
        match kind {
            IndicatorKind::MovingAverage { period } => Self::MovingAverage(SlidingMean::new(period)),
            IndicatorKind::Rsi { period } => Self::Rsi(WilderRsi::new(period)),
            IndicatorKind::Macd { fast, slow, signal } => Self::Macd(MacdState::new(fast, slow, signal)),
            IndicatorKind::Bollinger { period, k } => Self::Bollinger(BollingerState::new(period, k)),
        }
    }

    /// Recompute from the series and record the reading in `snapshot`
    pub fn recompute_into(&mut self, series: &AssetSeries, snapshot: &mut IndicatorSnapshot) {
        match self {
            Self::MovingAverage(ma) => {
                snapshot.moving_averages.insert(ma.period(), ma.recompute(series));
            }
            Self::Rsi(rsi) => snapshot.rsi = rsi.recompute(series),
            Self::Macd(macd) => snapshot.macd = macd.recompute(series),
            Self::Bollinger(bands) => snapshot.bollinger = bands.recompute(series),
        }
    }
}

/// Indicator values for one asset as of its latest observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub asset: String,
    pub as_of: DateTime<Utc>,
    pub price: f64,
    pub volume: f64,
    pub observations: usize,
    pub rsi: Reading<f64>,
    pub macd: Reading<MacdValue>,
    pub bollinger: Reading<BollingerBands>,
    /// Moving averages keyed by period
    pub moving_averages: BTreeMap<usize, Reading<f64>>,
    /// Percent price change over the configured lookback
    pub change_pct: Reading<f64>,
    /// Set when the latest fetch for this asset failed
    pub stale: bool,
}

impl IndicatorSnapshot {
    pub fn moving_average(&self, period: usize) -> Option<f64> {
        self.moving_averages.get(&period).and_then(|r| r.value())
    }
}

#[derive(Debug, Clone)]
struct AssetIndicators {
    states: Vec<IndicatorState>,
    latest: Option<IndicatorSnapshot>,
    previous: Option<IndicatorSnapshot>,
}

/// Computes indicator snapshots from cached series
pub struct IndicatorEngine {
    kinds: Vec<IndicatorKind>,
    change_lookback: Duration,
    assets: HashMap<String, AssetIndicators>,
}

impl IndicatorEngine {
    pub fn new(settings: &IndicatorSettings) -> Result<Self, EngineError> {
        settings.validate()?;

        Ok(Self {
            kinds: settings.kinds(),
            change_lookback: settings.change_lookback()?,
            assets: HashMap::new(),
        })
    }

    pub fn kinds(&self) -> &[IndicatorKind] {
        &self.kinds
    }

    /// Recompute all indicators for an asset from its series
    ///
    /// Returns None when the series is empty.
    pub fn recompute(&mut self, asset: &str, series: &AssetSeries) -> Option<&IndicatorSnapshot> {
        let newest = *series.last()?;

        let kinds = &self.kinds;
        let entry = self
            .assets
            .entry(asset.to_string())
            .or_insert_with(|| AssetIndicators {
                states: kinds.iter().map(|&k| IndicatorState::new(k)).collect(),
                latest: None,
                previous: None,
            });

        let mut snapshot = IndicatorSnapshot {
            asset: asset.to_string(),
            as_of: newest.timestamp,
            price: newest.price,
            volume: newest.volume,
            observations: series.len(),
            rsi: Reading::insufficient(0, series.len()),
            macd: Reading::insufficient(0, series.len()),
            bollinger: Reading::insufficient(0, series.len()),
            moving_averages: BTreeMap::new(),
            change_pct: percent_change(series, self.change_lookback),
            stale: false,
        };

        for state in entry.states.iter_mut() {
            state.recompute_into(series, &mut snapshot);
        }

        tracing::debug!(
            asset,
            price = newest.price,
            rsi = ?snapshot.rsi.value(),
            observations = snapshot.observations,
            "Recomputed indicators"
        );

        entry.previous = entry.latest.replace(snapshot);
        entry.latest.as_ref()
    }

    /// Keep the last-known snapshot for an asset but flag it stale
    pub fn mark_stale(&mut self, asset: &str) -> Option<&IndicatorSnapshot> {
        let entry = self.assets.get_mut(asset)?;
        let snapshot = entry.latest.as_mut()?;
        snapshot.stale = true;
        Some(snapshot)
    }

    pub fn latest(&self, asset: &str) -> Option<&IndicatorSnapshot> {
        self.assets.get(asset).and_then(|a| a.latest.as_ref())
    }

    /// Snapshot from the cycle before the latest one
    pub fn previous(&self, asset: &str) -> Option<&IndicatorSnapshot> {
        self.assets.get(asset).and_then(|a| a.previous.as_ref())
    }

    pub fn snapshots(&self) -> BTreeMap<String, IndicatorSnapshot> {
        self.assets
            .iter()
            .filter_map(|(asset, a)| a.latest.clone().map(|s| (asset.clone(), s)))
            .collect()
    }

    pub fn remove_asset(&mut self, asset: &str) {
        self.assets.remove(asset);
    }
}

/// Percent move between the first and last observation of the lookback window
pub fn percent_change(series: &AssetSeries, lookback: Duration) -> Reading<f64> {
    let window = series.window(lookback);

    match (window.first(), window.last()) {
        (Some(first), Some(last)) if window.len() >= 2 => {
            Reading::ready((last.price - first.price) / first.price * 100.0)
        }
        _ => Reading::insufficient(2, window.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TimeSeriesCache;
    use crate::indicators::calculate_sma;
    use crate::models::Observation;
    use chrono::TimeZone;

    fn feed(cache: &mut TimeSeriesCache, asset: &str, minute: i64, price: f64) {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        cache
            .append(asset, Observation { timestamp, price, volume: 10.0 })
            .unwrap();
    }

    fn engine() -> IndicatorEngine {
        IndicatorEngine::new(&IndicatorSettings::default()).unwrap()
    }

    #[test]
    fn test_kind_validation() {
        assert!(IndicatorKind::Rsi { period: 0 }.validate().is_err());
        assert!(IndicatorKind::Macd { fast: 26, slow: 12, signal: 9 }.validate().is_err());
        assert!(IndicatorKind::Bollinger { period: 20, k: -1.0 }.validate().is_err());
        assert!(IndicatorKind::Bollinger { period: 20, k: 2.0 }.validate().is_ok());
        assert_eq!(IndicatorKind::Macd { fast: 12, slow: 26, signal: 9 }.required_observations(), 34);
    }

    #[test]
    fn test_empty_series_has_no_snapshot() {
        let mut cache = TimeSeriesCache::new(10).unwrap();
        feed(&mut cache, "BTC", 0, 1.0);
        cache.clear_asset("BTC");

        let mut engine = engine();
        assert!(engine.latest("BTC").is_none());
        assert!(engine.mark_stale("BTC").is_none());
    }

    #[test]
    fn test_early_snapshot_reports_insufficient_data() {
        let mut cache = TimeSeriesCache::new(1000).unwrap();
        let mut engine = engine();

        for i in 0..10 {
            feed(&mut cache, "BTC", i, 100.0 + i as f64);
        }

        let snapshot = engine.recompute("BTC", cache.series("BTC").unwrap()).unwrap();

        assert!(snapshot.moving_average(7).is_some());
        assert_eq!(snapshot.moving_averages[&30], Reading::insufficient(30, 10));
        assert_eq!(snapshot.rsi, Reading::insufficient(15, 10));
        assert_eq!(snapshot.macd, Reading::insufficient(34, 10));
        assert_eq!(snapshot.bollinger, Reading::insufficient(20, 10));
        assert!(snapshot.change_pct.is_ready());
    }

    #[test]
    fn test_full_snapshot_invariants() {
        let mut cache = TimeSeriesCache::new(1000).unwrap();
        let mut engine = engine();
        let mut prices = Vec::new();

        for i in 0..80 {
            let price = 40_000.0 + (i as f64 * 0.4).sin() * 800.0;
            prices.push(price);
            feed(&mut cache, "BTC", i, price);
            engine.recompute("BTC", cache.series("BTC").unwrap());
        }

        let snapshot = engine.latest("BTC").unwrap();
        let rsi = snapshot.rsi.value().unwrap();
        let macd = snapshot.macd.value().unwrap();
        let bands = snapshot.bollinger.value().unwrap();

        assert!((0.0..=100.0).contains(&rsi));
        assert_eq!(macd.histogram, macd.line - macd.signal);
        assert!(bands.upper >= bands.middle && bands.middle >= bands.lower);
        assert!((bands.middle - calculate_sma(&prices, 20).unwrap()).abs() < 1e-6);

        let ma50 = snapshot.moving_average(50).unwrap();
        assert!((ma50 - calculate_sma(&prices, 50).unwrap()).abs() < 1e-6);
        assert_eq!(snapshot.observations, 80);
        assert!(!snapshot.stale);
    }

    #[test]
    fn test_previous_snapshot_retained() {
        let mut cache = TimeSeriesCache::new(100).unwrap();
        let mut engine = engine();

        feed(&mut cache, "ETH", 0, 100.0);
        engine.recompute("ETH", cache.series("ETH").unwrap());
        assert!(engine.previous("ETH").is_none());

        feed(&mut cache, "ETH", 1, 110.0);
        engine.recompute("ETH", cache.series("ETH").unwrap());

        assert_eq!(engine.previous("ETH").unwrap().price, 100.0);
        assert_eq!(engine.latest("ETH").unwrap().price, 110.0);
        assert_eq!(engine.latest("ETH").unwrap().change_pct, Reading::ready(10.0));
    }

    #[test]
    fn test_mark_stale_keeps_values() {
        let mut cache = TimeSeriesCache::new(100).unwrap();
        let mut engine = engine();

        for i in 0..20 {
            feed(&mut cache, "SOL", i, 150.0);
        }
        engine.recompute("SOL", cache.series("SOL").unwrap());

        let stale = engine.mark_stale("SOL").unwrap();
        assert!(stale.stale);
        assert_eq!(stale.rsi, Reading::ready(100.0));

        // Next successful recompute clears the flag
        feed(&mut cache, "SOL", 20, 151.0);
        let fresh = engine.recompute("SOL", cache.series("SOL").unwrap()).unwrap();
        assert!(!fresh.stale);
    }

    #[test]
    fn test_bollinger_middle_matches_ma20_every_cycle() {
        let settings = IndicatorSettings {
            moving_averages: vec![7, 30, 50, 20],
            ..IndicatorSettings::default()
        };
        let mut engine = IndicatorEngine::new(&settings).unwrap();
        // Small capacity so the sliding updates run across evictions
        let mut cache = TimeSeriesCache::new(60).unwrap();
        let mut compared = 0;

        for i in 0..300 {
            let price = 40_000.0 + (i as f64 * 0.37).sin() * 1_234.567 + (i % 7) as f64 * 0.1;
            feed(&mut cache, "BTC", i, price);
            let snapshot = engine.recompute("BTC", cache.series("BTC").unwrap()).unwrap();

            if let (Some(ma20), Some(bands)) = (snapshot.moving_average(20), snapshot.bollinger.value()) {
                assert_eq!(bands.middle, ma20, "diverged at tick {}", i);
                compared += 1;
            }
        }

        assert_eq!(compared, 281);
    }

    #[test]
    fn test_percent_change_handles_unbounded_lookback() {
        let mut cache = TimeSeriesCache::new(10).unwrap();
        feed(&mut cache, "BTC", 0, 100.0);
        feed(&mut cache, "BTC", 1, 150.0);

        let reading = percent_change(cache.series("BTC").unwrap(), Duration::MAX);
        assert_eq!(reading, Reading::ready(50.0));
    }

    #[test]
    fn test_percent_change_needs_two_points() {
        let mut cache = TimeSeriesCache::new(10).unwrap();
        feed(&mut cache, "BTC", 0, 100.0);

        let reading = percent_change(cache.series("BTC").unwrap(), Duration::hours(24));
        assert_eq!(reading, Reading::insufficient(2, 1));
    }
}
