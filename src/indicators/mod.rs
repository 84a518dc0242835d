// Technical indicators module
// Implements MA, EMA, RSI, MACD and Bollinger Bands over cached series

pub mod bollinger;
pub mod engine;
pub mod macd;
pub mod moving_average;
pub mod rsi;

pub use bollinger::{calculate_bollinger, BollingerBands};
pub use engine::{percent_change, IndicatorEngine, IndicatorKind, IndicatorSnapshot, IndicatorState};
pub use macd::{calculate_macd, MacdValue};
pub use moving_average::{calculate_ema, calculate_sma};
pub use rsi::calculate_rsi;

use crate::cache::AssetSeries;
use crate::error::EngineError;
use crate::models::Observation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of an indicator computation
///
/// Indicators never compute over a short window; until enough history
/// exists they report how much they need.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reading<T> {
    Ready { value: T },
    InsufficientData { required: usize, available: usize },
}

impl<T> Reading<T> {
    pub fn ready(value: T) -> Self {
        Self::Ready { value }
    }

    pub fn insufficient(required: usize, available: usize) -> Self {
        Self::InsufficientData {
            required,
            available,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn value(self) -> Option<T> {
        match self {
            Self::Ready { value } => Some(value),
            Self::InsufficientData { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reading<U> {
        match self {
            Self::Ready { value } => Reading::Ready { value: f(value) },
            Self::InsufficientData {
                required,
                available,
            } => Reading::InsufficientData {
                required,
                available,
            },
        }
    }

    /// Convert into a `Result`, naming the indicator in the error
    pub fn into_result(self, indicator: &str) -> Result<T, EngineError> {
        match self {
            Self::Ready { value } => Ok(value),
            Self::InsufficientData {
                required,
                available,
            } => Err(EngineError::InsufficientData {
                indicator: indicator.to_string(),
                required,
                available,
            }),
        }
    }
}

impl fmt::Display for Reading<f64> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready { value } => write!(f, "{:.2}", value),
            Self::InsufficientData { .. } => write!(f, "N/A"),
        }
    }
}

/// How a streaming indicator absorbs the current state of a series
pub(crate) enum Step<'a> {
    /// Nothing new since the last recompute
    Unchanged,
    /// Exactly one observation was appended
    Next(&'a Observation),
    /// State is out of step with the series and must be rebuilt
    Rebuild,
}

pub(crate) fn plan_step(series: &AssetSeries, last_seen: Option<DateTime<Utc>>) -> Step<'_> {
    let (Some(seen), Some(newest)) = (last_seen, series.last()) else {
        return Step::Rebuild;
    };

    if newest.timestamp == seen {
        return Step::Unchanged;
    }

    match series.len().checked_sub(2).and_then(|i| series.get(i)) {
        Some(prev) if prev.timestamp == seen => Step::Next(newest),
        _ => Step::Rebuild,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_accessors() {
        let ready: Reading<f64> = Reading::ready(42.0);
        assert!(ready.is_ready());
        assert_eq!(ready.value(), Some(42.0));
        assert_eq!(ready.to_string(), "42.00");

        let missing: Reading<f64> = Reading::insufficient(15, 3);
        assert_eq!(missing.value(), None);
        assert_eq!(missing.to_string(), "N/A");
        assert!(matches!(
            missing.into_result("RSI(14)"),
            Err(EngineError::InsufficientData { required: 15, available: 3, .. })
        ));
    }

    #[test]
    fn test_reading_serialization() {
        let json = serde_json::to_string(&Reading::ready(1.5)).unwrap();
        assert_eq!(json, r#"{"status":"ready","value":1.5}"#);

        let json = serde_json::to_string(&Reading::<f64>::insufficient(20, 4)).unwrap();
        assert_eq!(json, r#"{"status":"insufficient_data","required":20,"available":4}"#);
    }
}
