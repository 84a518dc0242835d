use crate::error::EngineError;
use crate::indicators::IndicatorSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Value an alert rule watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    Price,
    Rsi,
    MacdHistogram,
    PercentChange,
}

impl AlertMetric {
    /// Read the metric from a snapshot; None while the indicator lacks data
    pub fn observe(&self, snapshot: &IndicatorSnapshot) -> Option<f64> {
        match self {
            Self::Price => Some(snapshot.price),
            Self::Rsi => snapshot.rsi.value(),
            Self::MacdHistogram => snapshot.macd.value().map(|m| m.histogram),
            Self::PercentChange => snapshot.change_pct.value(),
        }
    }
}

impl fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Price => "price",
            Self::Rsi => "RSI",
            Self::MacdHistogram => "MACD histogram",
            Self::PercentChange => "% change",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Above,
    Below,
    /// Value moved across (or onto) the threshold since the last evaluation
    Crosses,
}

impl Comparator {
    pub fn holds(&self, threshold: f64, previous: Option<f64>, current: f64) -> bool {
        match self {
            Self::Above => current > threshold,
            Self::Below => current < threshold,
            Self::Crosses => match previous {
                Some(prev) => {
                    (prev < threshold && current >= threshold)
                        || (prev > threshold && current <= threshold)
                }
                None => false,
            },
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Above => "above",
            Self::Below => "below",
            Self::Crosses => "crosses",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Armed,
    Fired,
    Disabled,
}

/// How a fired rule returns to `Armed`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RearmPolicy {
    /// Re-arm once the condition stops holding
    #[default]
    Auto,
    /// Stay fired until explicitly re-armed
    Manual,
}

/// Rule definition as supplied by the user or the alerts file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlertRule {
    pub asset: String,
    pub metric: AlertMetric,
    pub comparator: Comparator,
    pub threshold: f64,
    /// Falls back to the evaluator's default policy
    #[serde(default)]
    pub rearm: Option<RearmPolicy>,
}

impl NewAlertRule {
    pub fn new(asset: impl Into<String>, metric: AlertMetric, comparator: Comparator, threshold: f64) -> Self {
        Self {
            asset: asset.into(),
            metric,
            comparator,
            threshold,
            rearm: None,
        }
    }

    pub fn with_rearm(mut self, rearm: RearmPolicy) -> Self {
        self.rearm = Some(rearm);
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.asset.trim().is_empty() {
            return Err(EngineError::configuration("alert rule needs an asset"));
        }

        if !self.threshold.is_finite() {
            return Err(EngineError::configuration(format!(
                "alert threshold must be finite, got {}",
                self.threshold
            )));
        }

        match self.metric {
            AlertMetric::Price if self.threshold <= 0.0 => Err(EngineError::configuration(format!(
                "price threshold must be positive, got {}",
                self.threshold
            ))),
            AlertMetric::Rsi if !(0.0..=100.0).contains(&self.threshold) => {
                Err(EngineError::configuration(format!(
                    "RSI threshold must be within [0, 100], got {}",
                    self.threshold
                )))
            }
            _ => Ok(()),
        }
    }
}

/// A threshold rule with its state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub asset: String,
    pub metric: AlertMetric,
    pub comparator: Comparator,
    pub threshold: f64,
    pub state: AlertState,
    pub rearm: RearmPolicy,
    /// Value seen on the last evaluated cycle
    pub last_value: Option<f64>,
    /// Whether the condition held on the last evaluated cycle
    pub last_condition: Option<bool>,
}

impl AlertRule {
    pub(crate) fn from_new(rule: NewAlertRule, default_rearm: RearmPolicy) -> Result<Self, EngineError> {
        rule.validate()?;

        Ok(Self {
            id: Uuid::new_v4(),
            asset: rule.asset,
            metric: rule.metric,
            comparator: rule.comparator,
            threshold: rule.threshold,
            state: AlertState::Armed,
            rearm: rule.rearm.unwrap_or(default_rearm),
            last_value: None,
            last_condition: None,
        })
    }

    /// Advance the state machine with this cycle's value
    ///
    /// Returns an event only on the cycle the rule transitions to `Fired`.
    pub(crate) fn step(&mut self, value: f64, now: DateTime<Utc>) -> Option<AlertEvent> {
        let holds = self.comparator.holds(self.threshold, self.last_value, value);
        let held_before = self.last_condition.unwrap_or(false);

        self.last_value = Some(value);
        self.last_condition = Some(holds);

        if self.state == AlertState::Fired && self.rearm == RearmPolicy::Auto {
            // A crossing is momentary, so it has always ended by the next cycle
            let settled = match self.comparator {
                Comparator::Crosses => true,
                _ => !holds,
            };
            if settled {
                self.state = AlertState::Armed;
            }
        }

        if self.state != AlertState::Armed {
            return None;
        }

        let edge = match self.comparator {
            Comparator::Crosses => holds,
            _ => holds && !held_before,
        };
        if !edge {
            return None;
        }

        self.state = AlertState::Fired;
        Some(AlertEvent {
            id: Uuid::new_v4(),
            rule_id: self.id,
            asset: self.asset.clone(),
            metric: self.metric,
            comparator: self.comparator,
            threshold: self.threshold,
            observed: value,
            fired_at: now,
        })
    }
}

impl fmt::Display for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.asset, self.metric, self.comparator, self.threshold
        )
    }
}

/// Record of one rule firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub asset: String,
    pub metric: AlertMetric,
    pub comparator: Comparator,
    pub threshold: f64,
    pub observed: f64,
    pub fired_at: DateTime<Utc>,
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} (observed {:.2})",
            self.asset, self.metric, self.comparator, self.threshold, self.observed
        )
    }
}
