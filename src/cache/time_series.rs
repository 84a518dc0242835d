use crate::error::EngineError;
use crate::models::Observation;
use chrono::Duration;
use std::collections::vec_deque;
use std::collections::{HashMap, VecDeque};

/// Time-ordered observations for a single asset
///
/// Timestamps are strictly increasing and the length never exceeds the
/// capacity; the oldest observation is evicted first.
#[derive(Debug, Clone)]
pub struct AssetSeries {
    observations: VecDeque<Observation>,
    capacity: usize,
}

impl AssetSeries {
    fn new(capacity: usize) -> Self {
        Self {
            observations: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an observation, returning the evicted one if the series was full
    fn push(&mut self, asset: &str, observation: Observation) -> Result<Option<Observation>, EngineError> {
        observation.validate(asset)?;

        if let Some(last) = self.observations.back() {
            if observation.timestamp <= last.timestamp {
                return Err(EngineError::OutOfOrder {
                    asset: asset.to_string(),
                    timestamp: observation.timestamp,
                    last: last.timestamp,
                });
            }
        }

        self.observations.push_back(observation);

        let evicted = if self.observations.len() > self.capacity {
            self.observations.pop_front()
        } else {
            None
        };

        Ok(evicted)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&Observation> {
        self.observations.get(index)
    }

    pub fn first(&self) -> Option<&Observation> {
        self.observations.front()
    }

    pub fn last(&self) -> Option<&Observation> {
        self.observations.back()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, Observation> {
        self.observations.iter()
    }

    /// Prices of the last `n` observations, oldest first
    pub fn last_prices(&self, n: usize) -> impl Iterator<Item = f64> + '_ {
        let start = self.observations.len().saturating_sub(n);
        self.observations.range(start..).map(|o| o.price)
    }

    /// View over the most recent observations spanning at least `lookback`
    pub fn window(&self, lookback: Duration) -> Window<'_> {
        let Some(last) = self.observations.back() else {
            return Window::new(self.observations.range(0..0));
        };

        // Latest index whose timestamp is at or before the cutoff; the window
        // starts there so it spans the whole lookback. A lookback reaching
        // past the representable range covers all history.
        let start = last
            .timestamp
            .checked_sub_signed(lookback)
            .and_then(|cutoff| self.observations.iter().rposition(|o| o.timestamp <= cutoff))
            .unwrap_or(0);

        Window::new(self.observations.range(start..))
    }

    /// View over the last `n` observations
    pub fn recent(&self, n: usize) -> Window<'_> {
        let start = self.observations.len().saturating_sub(n);
        Window::new(self.observations.range(start..))
    }
}

/// Read-only, restartable view over a contiguous run of observations
#[derive(Debug, Clone)]
pub struct Window<'a> {
    inner: vec_deque::Iter<'a, Observation>,
}

impl<'a> Window<'a> {
    fn new(inner: vec_deque::Iter<'a, Observation>) -> Self {
        Self { inner }
    }

    fn empty() -> Self {
        Self {
            inner: Default::default(),
        }
    }

    /// Iterate from the start of the window; may be called repeatedly
    pub fn iter(&self) -> vec_deque::Iter<'a, Observation> {
        self.inner.clone()
    }

    pub fn prices(&self) -> impl Iterator<Item = f64> + 'a {
        self.inner.clone().map(|o| o.price)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    pub fn first(&self) -> Option<&'a Observation> {
        self.inner.clone().next()
    }

    pub fn last(&self) -> Option<&'a Observation> {
        self.inner.clone().next_back()
    }
}

impl<'a> IntoIterator for Window<'a> {
    type Item = &'a Observation;
    type IntoIter = vec_deque::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner
    }
}

impl<'a> IntoIterator for &Window<'a> {
    type Item = &'a Observation;
    type IntoIter = vec_deque::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// In-memory rolling cache of observations for each tracked asset
///
/// Owned by the analysis engine, which is the only writer.
#[derive(Debug, Clone)]
pub struct TimeSeriesCache {
    series: HashMap<String, AssetSeries>,
    capacity: usize,
}

impl TimeSeriesCache {
    /// Create a new cache
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of observations kept per asset
    pub fn new(capacity: usize) -> Result<Self, EngineError> {
        if capacity == 0 {
            return Err(EngineError::configuration("cache capacity must be at least 1"));
        }

        Ok(Self {
            series: HashMap::new(),
            capacity,
        })
    }

    /// Record an observation for an asset
    ///
    /// Fails with `OutOfOrder` when the timestamp is not after the last
    /// recorded one; the series is left unchanged in that case.
    pub fn append(&mut self, asset: &str, observation: Observation) -> Result<Option<Observation>, EngineError> {
        let capacity = self.capacity;
        let series = self
            .series
            .entry(asset.to_string())
            .or_insert_with(|| AssetSeries::new(capacity));

        let evicted = series.push(asset, observation)?;

        if let Some(ref dropped) = evicted {
            tracing::trace!(asset, evicted_at = %dropped.timestamp, "Evicted oldest observation");
        }

        Ok(evicted)
    }

    /// Append observations in order, skipping ones that are rejected
    ///
    /// Returns how many were accepted.
    pub fn extend(&mut self, asset: &str, observations: impl IntoIterator<Item = Observation>) -> usize {
        let mut accepted = 0;
        for observation in observations {
            match self.append(asset, observation) {
                Ok(_) => accepted += 1,
                Err(e) => tracing::debug!("Skipping observation: {}", e),
            }
        }
        accepted
    }

    pub fn series(&self, asset: &str) -> Option<&AssetSeries> {
        self.series.get(asset)
    }

    /// Most recent observations covering at least `lookback`, or all history if shorter
    pub fn window(&self, asset: &str, lookback: Duration) -> Window<'_> {
        self.series
            .get(asset)
            .map(|s| s.window(lookback))
            .unwrap_or_else(Window::empty)
    }

    /// The `n` most recent observations for an asset
    pub fn recent(&self, asset: &str, n: usize) -> Window<'_> {
        self.series
            .get(asset)
            .map(|s| s.recent(n))
            .unwrap_or_else(Window::empty)
    }

    pub fn latest(&self, asset: &str) -> Option<&Observation> {
        self.series.get(asset).and_then(|s| s.last())
    }

    /// Latest known price for every cached asset
    pub fn latest_prices(&self) -> HashMap<String, f64> {
        self.series
            .iter()
            .filter_map(|(asset, s)| s.last().map(|o| (asset.clone(), o.price)))
            .collect()
    }

    pub fn len(&self, asset: &str) -> usize {
        self.series.get(asset).map(|s| s.len()).unwrap_or(0)
    }

    pub fn assets(&self) -> Vec<String> {
        self.series.keys().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear_asset(&mut self, asset: &str) {
        self.series.remove(asset);
    }
}
