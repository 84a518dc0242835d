use crate::alerts::{AlertEvaluator, AlertEvent, NewAlertRule};
use crate::cache::TimeSeriesCache;
use crate::config::Settings;
use crate::error::EngineError;
use crate::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::models::{Holding, Observation};
use crate::portfolio::{PortfolioLedger, PortfolioSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Everything a refresh cycle produced, published once the cycle completes
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub completed_at: DateTime<Utc>,
    /// Latest snapshot per asset, including stale ones
    pub indicators: BTreeMap<String, IndicatorSnapshot>,
    pub portfolio: PortfolioSnapshot,
    /// Alerts fired during this cycle
    pub alerts: Vec<AlertEvent>,
    /// Assets whose fetch or append failed this cycle
    #[serde(serialize_with = "serialize_failures")]
    pub failures: BTreeMap<String, EngineError>,
    /// Observations appended to the cache this cycle
    pub accepted: Vec<(String, Observation)>,
}

fn serialize_failures<S: serde::Serializer>(
    failures: &BTreeMap<String, EngineError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(failures.iter().map(|(asset, e)| (asset, e.to_string())))
}

impl CycleReport {
    pub fn is_healthy(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Single-writer state: cache, indicators, alerts and holdings
///
/// All mutation goes through `&mut self`; the scheduler serialises access.
pub struct AnalysisEngine {
    cache: TimeSeriesCache,
    indicators: IndicatorEngine,
    alerts: AlertEvaluator,
    ledger: PortfolioLedger,
    assets: Vec<String>,
    cycle: u64,
}

impl AnalysisEngine {
    pub fn new(settings: &Settings) -> Result<Self, EngineError> {
        settings.validate()?;

        Ok(Self {
            cache: TimeSeriesCache::new(settings.cache_capacity)?,
            indicators: IndicatorEngine::new(&settings.indicators)?,
            alerts: AlertEvaluator::new(settings.rearm_policy),
            ledger: PortfolioLedger::new(),
            assets: settings.assets.clone(),
            cycle: 0,
        })
    }

    /// Build an engine with persisted holdings and alert rules
    pub fn with_state(
        settings: &Settings,
        holdings: Vec<Holding>,
        rules: Vec<NewAlertRule>,
    ) -> Result<Self, EngineError> {
        let mut engine = Self::new(settings)?;
        engine.ledger = PortfolioLedger::with_holdings(holdings)?;

        for rule in rules {
            engine.alerts.add_rule(rule)?;
        }

        Ok(engine)
    }

    /// Configured assets plus anything held or watched by a rule
    pub fn tracked_assets(&self) -> Vec<String> {
        let mut assets = self.assets.clone();
        let extra = self.ledger.assets().into_iter().chain(self.alerts.assets());

        for asset in extra {
            if !assets.contains(&asset) {
                assets.push(asset);
            }
        }

        assets
    }

    pub fn track_asset(&mut self, asset: &str) {
        if !self.assets.iter().any(|a| a == asset) {
            self.assets.push(asset.to_string());
        }
    }

    /// Stop tracking an asset and drop its cached history
    pub fn untrack_asset(&mut self, asset: &str) {
        self.assets.retain(|a| a != asset);
        self.cache.clear_asset(asset);
        self.indicators.remove_asset(asset);
    }

    /// Load history into the cache ahead of the first cycle
    ///
    /// Observations that are not newer than the cached tail are skipped.
    pub fn seed_history(&mut self, asset: &str, observations: Vec<Observation>) -> usize {
        let added = self.cache.extend(asset, observations);

        if let Some(series) = self.cache.series(asset) {
            self.indicators.recompute(asset, series);
        }

        tracing::info!(asset, added, "📚 Seeded history");
        added
    }

    /// Fold one batch of fetch results into the engine
    ///
    /// Per-asset failures never abort the cycle: a failed fetch or a
    /// rejected tick leaves the cached data intact and flags the asset's
    /// snapshot stale.
    pub fn apply_cycle(
        &mut self,
        batch: HashMap<String, Result<Observation, EngineError>>,
        now: DateTime<Utc>,
    ) -> CycleReport {
        self.cycle += 1;

        let mut failures = BTreeMap::new();
        let mut accepted = Vec::new();
        let mut fresh = BTreeMap::new();

        let ordered: BTreeMap<String, Result<Observation, EngineError>> = batch.into_iter().collect();

        for (asset, result) in ordered {
            let appended = result.and_then(|observation| {
                self.cache.append(&asset, observation)?;
                Ok(observation)
            });

            match appended {
                Ok(observation) => {
                    accepted.push((asset.clone(), observation));

                    let snapshot = self
                        .cache
                        .series(&asset)
                        .and_then(|series| self.indicators.recompute(&asset, series));
                    if let Some(snapshot) = snapshot {
                        fresh.insert(asset, snapshot.clone());
                    }
                }
                Err(e) => {
                    if matches!(e, EngineError::OutOfOrder { .. } | EngineError::InvalidObservation { .. }) {
                        tracing::warn!(asset = %asset, "Rejected tick: {}", e);
                    }
                    self.indicators.mark_stale(&asset);
                    failures.insert(asset, e);
                }
            }
        }

        let alerts = self.alerts.evaluate(&fresh, now);
        let portfolio = self.ledger.snapshot(&self.cache.latest_prices());

        tracing::info!(
            cycle = self.cycle,
            updated = accepted.len(),
            failed = failures.len(),
            alerts = alerts.len(),
            total_value = portfolio.total_value,
            "✅ Cycle complete"
        );

        CycleReport {
            cycle: self.cycle,
            completed_at: now,
            indicators: self.indicators.snapshots(),
            portfolio,
            alerts,
            failures,
            accepted,
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    pub fn cache(&self) -> &TimeSeriesCache {
        &self.cache
    }

    pub fn indicators(&self) -> &IndicatorEngine {
        &self.indicators
    }

    pub fn alerts(&self) -> &AlertEvaluator {
        &self.alerts
    }

    pub fn alerts_mut(&mut self) -> &mut AlertEvaluator {
        &mut self.alerts
    }

    pub fn ledger(&self) -> &PortfolioLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut PortfolioLedger {
        &mut self.ledger
    }

    /// Value holdings against the latest cached prices
    pub fn portfolio(&self) -> PortfolioSnapshot {
        self.ledger.snapshot(&self.cache.latest_prices())
    }
}
