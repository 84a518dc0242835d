use super::{plan_step, Reading, Step};
use crate::cache::AssetSeries;
use chrono::{DateTime, Utc};

/// Calculate Relative Strength Index (RSI)
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions. Uses Wilder's smoothing: the first
/// averages are the simple mean of the first `period` changes, every
/// later change is folded in as `(avg * (period - 1) + x) / period`.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    let mut rsi = WilderRsi::new(period);
    prices.iter().fold(None, |_, &price| rsi.update(price))
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    (100.0 - (100.0 / (1.0 + rs))).clamp(0.0, 100.0)
}

/// Streaming RSI with Wilder's smoothing
#[derive(Debug, Clone)]
pub struct WilderRsi {
    period: usize,
    prev_price: Option<f64>,
    gain_sum: f64,
    loss_sum: f64,
    changes: usize,
    averages: Option<(f64, f64)>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl WilderRsi {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_price: None,
            gain_sum: 0.0,
            loss_sum: 0.0,
            changes: 0,
            averages: None,
            last_timestamp: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Observations needed before a value is produced
    pub fn required(&self) -> usize {
        self.period + 1
    }

    /// Feed the next price; returns the RSI once `period` changes are known
    pub fn update(&mut self, price: f64) -> Option<f64> {
        let prev = self.prev_price.replace(price)?;

        let change = price - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let n = self.period as f64;

        self.averages = match self.averages {
            Some((avg_gain, avg_loss)) => Some((
                (avg_gain * (n - 1.0) + gain) / n,
                (avg_loss * (n - 1.0) + loss) / n,
            )),
            None => {
                self.gain_sum += gain;
                self.loss_sum += loss;
                self.changes += 1;
                (self.changes == self.period).then(|| (self.gain_sum / n, self.loss_sum / n))
            }
        };

        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        self.averages
            .map(|(avg_gain, avg_loss)| rsi_from_averages(avg_gain, avg_loss))
    }

    pub fn recompute(&mut self, series: &AssetSeries) -> Reading<f64> {
        match plan_step(series, self.last_timestamp) {
            Step::Unchanged => {}
            Step::Next(newest) => {
                self.update(newest.price);
            }
            Step::Rebuild => {
                *self = Self::new(self.period);
                for observation in series.iter() {
                    self.update(observation.price);
                }
            }
        }

        self.last_timestamp = series.last().map(|o| o.timestamp);

        match self.value() {
            Some(rsi) => Reading::ready(rsi),
            None => Reading::insufficient(self.required(), series.len()),
        }
    }
}
