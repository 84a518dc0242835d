use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single price/volume sample for an asset
///
/// Observations are immutable once recorded in the cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: f64,
}

impl Observation {
    /// Create a validated observation
    ///
    /// Price must be positive and volume non-negative, both finite.
    pub fn new(timestamp: DateTime<Utc>, price: f64, volume: f64) -> Result<Self, EngineError> {
        let observation = Self {
            timestamp,
            price,
            volume,
        };
        observation.validate("")?;
        Ok(observation)
    }

    pub(crate) fn validate(&self, asset: &str) -> Result<(), EngineError> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(EngineError::InvalidObservation {
                asset: asset.to_string(),
                reason: format!("price must be positive, got {}", self.price),
            });
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(EngineError::InvalidObservation {
                asset: asset.to_string(),
                reason: format!("volume must be non-negative, got {}", self.volume),
            });
        }
        Ok(())
    }
}

/// Start of a lookback ending now; saturates at the earliest representable time
pub fn cutoff_before(lookback: chrono::Duration) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_signed(lookback)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A user's position in an asset on one exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub asset: String,
    pub quantity: f64,
    /// Cost basis per unit
    pub cost_basis: f64,
    #[serde(default = "default_exchange")]
    pub exchange: String,
}

fn default_exchange() -> String {
    "wallet".to_string()
}

impl Holding {
    pub fn new(asset: impl Into<String>, quantity: f64, cost_basis: f64, exchange: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            quantity,
            cost_basis,
            exchange: exchange.into(),
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.quantity * self.cost_basis
    }
}
