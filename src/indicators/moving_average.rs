use super::{plan_step, Reading, Step};
use crate::cache::AssetSeries;
use chrono::{DateTime, Utc};

/// Calculate Simple Moving Average (SMA) of the last `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices[prices.len() - period..].iter().sum();
    Some(sum / period as f64)
}

/// Calculate Exponential Moving Average (EMA)
///
/// Seeded with the SMA of the first `period` prices.
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    let mut ema = Ema::new(period);
    prices.iter().fold(None, |_, &price| ema.update(price))
}

/// Incrementally maintained exponential moving average
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    multiplier: f64,
    seed_sum: f64,
    seed_count: usize,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            multiplier: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            seed_count: 0,
            value: None,
        }
    }

    /// Feed the next input; returns the EMA once `period` inputs have been seen
    pub fn update(&mut self, input: f64) -> Option<f64> {
        match self.value {
            Some(ema) => {
                self.value = Some((input - ema) * self.multiplier + ema);
            }
            None => {
                self.seed_sum += input;
                self.seed_count += 1;
                if self.seed_count == self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.period);
    }
}

/// Simple moving average that slides by one observation without a rescan
///
/// Falls back to a full recompute whenever more than one observation
/// arrived since the last call, or when the value leaving the window has
/// already been evicted from the cache.
#[derive(Debug, Clone)]
pub struct SlidingMean {
    period: usize,
    value: Option<f64>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl SlidingMean {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            value: None,
            last_timestamp: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn recompute(&mut self, series: &AssetSeries) -> Reading<f64> {
        let len = series.len();
        if len < self.period {
            self.value = None;
            self.last_timestamp = series.last().map(|o| o.timestamp);
            return Reading::insufficient(self.period, len);
        }

        let value = match (plan_step(series, self.last_timestamp), self.value) {
            (Step::Unchanged, Some(mean)) => mean,
            (Step::Next(newest), Some(mean)) if len > self.period => {
                // Element that just slid out of the window
                let dropped = series.get(len - 1 - self.period).map(|o| o.price);
                match dropped {
                    Some(dropped) => mean + (newest.price - dropped) / self.period as f64,
                    None => self.full_mean(series),
                }
            }
            _ => self.full_mean(series),
        };

        self.value = Some(value);
        self.last_timestamp = series.last().map(|o| o.timestamp);
        Reading::ready(value)
    }

    fn full_mean(&self, series: &AssetSeries) -> f64 {
        let prices: Vec<f64> = series.last_prices(self.period).collect();
        prices.iter().sum::<f64>() / self.period as f64
    }
}
