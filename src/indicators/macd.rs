use super::moving_average::Ema;
use super::{plan_step, Reading, Step};
use crate::cache::AssetSeries;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// MACD output values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValue {
    /// Fast EMA minus slow EMA
    pub line: f64,
    /// EMA of the MACD line
    pub signal: f64,
    /// Line minus signal
    pub histogram: f64,
}

/// Calculate MACD over a full price history
pub fn calculate_macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdValue> {
    let mut macd = MacdState::new(fast, slow, signal);
    prices.iter().fold(None, |_, &price| macd.update(price))
}

/// Streaming MACD built from three incrementally updated EMAs
///
/// Each new price only needs the previous EMA values; the series is
/// rescanned only when the state falls out of step with the cache.
#[derive(Debug, Clone)]
pub struct MacdState {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    periods: (usize, usize, usize),
    value: Option<MacdValue>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl MacdState {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            periods: (fast, slow, signal),
            value: None,
            last_timestamp: None,
        }
    }

    /// Observations needed before the signal line exists
    pub fn required(&self) -> usize {
        let (fast, slow, signal) = self.periods;
        fast.max(slow) + signal - 1
    }

    pub fn update(&mut self, price: f64) -> Option<MacdValue> {
        let fast = self.fast.update(price);
        let slow = self.slow.update(price);

        if let (Some(fast), Some(slow)) = (fast, slow) {
            let line = fast - slow;
            if let Some(signal) = self.signal.update(line) {
                self.value = Some(MacdValue {
                    line,
                    signal,
                    histogram: line - signal,
                });
            }
        }

        self.value
    }

    pub fn recompute(&mut self, series: &AssetSeries) -> Reading<MacdValue> {
        match plan_step(series, self.last_timestamp) {
            Step::Unchanged => {}
            Step::Next(newest) => {
                self.update(newest.price);
            }
            Step::Rebuild => {
                let (fast, slow, signal) = self.periods;
                *self = Self::new(fast, slow, signal);
                for observation in series.iter() {
                    self.update(observation.price);
                }
            }
        }

        self.last_timestamp = series.last().map(|o| o.timestamp);

        match self.value {
            Some(value) => Reading::ready(value),
            None => Reading::insufficient(self.required(), series.len()),
        }
    }
}
