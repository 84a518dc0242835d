use super::rule::{AlertEvent, AlertRule, AlertState, NewAlertRule, RearmPolicy};
use crate::error::EngineError;
use crate::indicators::IndicatorSnapshot;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Owns alert rules and the append-only event log
pub struct AlertEvaluator {
    rules: Vec<AlertRule>,
    events: Vec<AlertEvent>,
    default_rearm: RearmPolicy,
}

impl AlertEvaluator {
    pub fn new(default_rearm: RearmPolicy) -> Self {
        Self {
            rules: Vec::new(),
            events: Vec::new(),
            default_rearm,
        }
    }

    /// Validate and register a rule in the `Armed` state
    pub fn add_rule(&mut self, rule: NewAlertRule) -> Result<Uuid, EngineError> {
        let rule = AlertRule::from_new(rule, self.default_rearm)?;
        let id = rule.id;

        tracing::info!(rule_id = %id, rule = %rule, "🔔 Alert rule added");
        self.rules.push(rule);
        Ok(id)
    }

    pub fn remove_rule(&mut self, id: Uuid) -> Result<AlertRule, EngineError> {
        let index = self
            .rules
            .iter()
            .position(|r| r.id == id)
            .ok_or(EngineError::UnknownRule(id))?;

        Ok(self.rules.remove(index))
    }

    /// Return a fired rule to `Armed`
    ///
    /// Armed rules are left as they are; disabled rules need `enable`.
    pub fn rearm(&mut self, id: Uuid) -> Result<(), EngineError> {
        let rule = self.rule_mut(id)?;
        if rule.state == AlertState::Fired {
            rule.state = AlertState::Armed;
        }
        Ok(())
    }

    pub fn disable(&mut self, id: Uuid) -> Result<(), EngineError> {
        self.rule_mut(id)?.state = AlertState::Disabled;
        Ok(())
    }

    pub fn enable(&mut self, id: Uuid) -> Result<(), EngineError> {
        let rule = self.rule_mut(id)?;
        if rule.state == AlertState::Disabled {
            rule.state = AlertState::Armed;
        }
        Ok(())
    }

    pub fn rule(&self, id: Uuid) -> Option<&AlertRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Every event fired so far, oldest first
    pub fn events(&self) -> &[AlertEvent] {
        &self.events
    }

    /// Assets referenced by at least one rule
    pub fn assets(&self) -> BTreeSet<String> {
        self.rules.iter().map(|r| r.asset.clone()).collect()
    }

    /// Evaluate every rule against this cycle's snapshots
    ///
    /// Rules whose asset has no fresh snapshot, or whose metric is not yet
    /// computable, keep their state untouched for this cycle.
    pub fn evaluate(
        &mut self,
        snapshots: &BTreeMap<String, IndicatorSnapshot>,
        now: DateTime<Utc>,
    ) -> Vec<AlertEvent> {
        let mut fired = Vec::new();

        for rule in self.rules.iter_mut() {
            let Some(snapshot) = snapshots.get(&rule.asset).filter(|s| !s.stale) else {
                continue;
            };

            let Some(value) = rule.metric.observe(snapshot) else {
                tracing::debug!(rule_id = %rule.id, asset = %rule.asset, metric = %rule.metric, "Metric not ready, skipping rule");
                continue;
            };

            if let Some(event) = rule.step(value, now) {
                tracing::info!(
                    rule_id = %rule.id,
                    asset = %event.asset,
                    observed = event.observed,
                    threshold = event.threshold,
                    "🚨 Alert fired: {}",
                    event
                );
                fired.push(event);
            }
        }

        self.events.extend(fired.iter().cloned());
        fired
    }

    fn rule_mut(&mut self, id: Uuid) -> Result<&mut AlertRule, EngineError> {
        self.rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(EngineError::UnknownRule(id))
    }
}

impl Default for AlertEvaluator {
    fn default() -> Self {
        Self::new(RearmPolicy::Auto)
    }
}
