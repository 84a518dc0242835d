use super::moving_average::{calculate_sma, SlidingMean};
use super::Reading;
use crate::cache::AssetSeries;
use serde::{Deserialize, Serialize};

/// Bollinger Bands output values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    /// Simple moving average over the band period
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Band width relative to the middle band
    pub fn bandwidth(&self) -> f64 {
        if self.middle == 0.0 {
            return 0.0;
        }
        (self.upper - self.lower) / self.middle
    }
}

/// Calculate Bollinger Bands over the last `period` prices
///
/// Uses the population standard deviation of the same window as the
/// middle band.
pub fn calculate_bollinger(prices: &[f64], period: usize, k: f64) -> Option<BollingerBands> {
    let middle = calculate_sma(prices, period)?;
    Some(bands_around(&prices[prices.len() - period..], middle, k))
}

fn bands_around(window: &[f64], middle: f64, k: f64) -> BollingerBands {
    let variance = window.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / window.len() as f64;
    let offset = k * variance.sqrt();

    BollingerBands {
        upper: middle + offset,
        middle,
        lower: middle - offset,
    }
}

/// Bollinger state for one asset
///
/// The middle band slides exactly like a moving average of the same period,
/// so it is bit-identical to that MA; the deviation is taken over the
/// trailing window each cycle.
#[derive(Debug, Clone)]
pub struct BollingerState {
    middle: SlidingMean,
    k: f64,
}

impl BollingerState {
    pub fn new(period: usize, k: f64) -> Self {
        Self {
            middle: SlidingMean::new(period),
            k,
        }
    }

    pub fn recompute(&mut self, series: &AssetSeries) -> Reading<BollingerBands> {
        let period = self.middle.period();
        let Some(middle) = self.middle.recompute(series).value() else {
            return Reading::insufficient(period, series.len());
        };

        let window: Vec<f64> = series.last_prices(period).collect();
        Reading::ready(bands_around(&window, middle, self.k))
    }
}
