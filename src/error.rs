use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the analysis engine
///
/// Every variant is local to one asset, rule or holding. None of them
/// abort a refresh cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A tick arrived with a timestamp at or before the last recorded one
    #[error("out-of-order observation for {asset}: {timestamp} is not after {last}")]
    OutOfOrder {
        asset: String,
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("invalid observation for {asset}: {reason}")]
    InvalidObservation { asset: String, reason: String },

    /// An indicator was requested before enough history was cached
    #[error("insufficient data for {indicator}: need {required} observations, have {available}")]
    InsufficientData {
        indicator: String,
        required: usize,
        available: usize,
    },

    #[error("fetch failed for {asset}: {reason}")]
    FetchFailure { asset: String, reason: String },

    #[error("insufficient holding of {asset} on {exchange}: requested {requested}, held {held}")]
    InsufficientHolding {
        asset: String,
        exchange: String,
        requested: f64,
        held: f64,
    },

    #[error("no holding of {asset} on {exchange}")]
    UnknownHolding { asset: String, exchange: String },

    #[error("unknown alert rule {0}")]
    UnknownRule(Uuid),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn fetch_failure(asset: &str, reason: impl ToString) -> Self {
        Self::FetchFailure {
            asset: asset.to_string(),
            reason: reason.to_string(),
        }
    }
}
