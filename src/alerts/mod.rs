// Alert rules and their edge-triggered evaluation

pub mod evaluator;
pub mod rule;

pub use evaluator::AlertEvaluator;
pub use rule::{AlertEvent, AlertMetric, AlertRule, AlertState, Comparator, NewAlertRule, RearmPolicy};
