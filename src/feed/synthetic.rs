use super::MarketDataSource;
use crate::models::Observation;
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Mutex;

/// Offline source producing a random walk per asset
///
/// Each asset starts from a base price derived from its name and moves by
/// up to `volatility` (fraction of price) per fetch.
pub struct SyntheticSource {
    state: Mutex<SyntheticState>,
    volatility: f64,
    base_volume: f64,
}

struct SyntheticState {
    rng: StdRng,
    prices: HashMap<String, f64>,
}

impl SyntheticSource {
    /// Create a new source with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(SyntheticState {
                rng: StdRng::seed_from_u64(seed),
                prices: HashMap::new(),
            }),
            volatility: 0.01,
            base_volume: 1_000_000.0,
        }
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility;
        self
    }

    /// Pin the current price of an asset
    pub fn set_price(&self, asset: &str, price: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.prices.insert(asset.to_string(), price);
        }
    }

    fn next_price(&self, asset: &str) -> anyhow::Result<(f64, f64)> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("synthetic source state poisoned"))?;
        let SyntheticState { rng, prices } = &mut *state;

        let price = prices
            .entry(asset.to_string())
            .or_insert_with(|| base_price(asset));

        let change = rng.gen_range(-self.volatility..=self.volatility);
        *price = (*price * (1.0 + change)).max(0.000_001);

        let volume = self.base_volume * rng.gen_range(0.5..1.5);
        Ok((*price, volume))
    }
}

/// Stable starting price in [10, 10_000) derived from the asset name
fn base_price(asset: &str) -> f64 {
    let hash = asset
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    10.0 + (hash % 9_990) as f64
}

impl MarketDataSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn fetch_observation(&self, asset: &str) -> anyhow::Result<Observation> {
        let (price, volume) = self.next_price(asset)?;
        Ok(Observation::new(Utc::now(), price, volume)?)
    }

    /// One observation per minute across the lookback, ending a minute ago
    async fn fetch_history(&self, asset: &str, lookback: Duration) -> anyhow::Result<Vec<Observation>> {
        let now = Utc::now();
        let points = lookback.num_minutes().max(0);
        let mut history = Vec::with_capacity(points as usize);

        for i in (1..=points).rev() {
            let (price, volume) = self.next_price(asset)?;
            history.push(Observation::new(now - Duration::minutes(i), price, volume)?);
        }

        Ok(history)
    }
}
