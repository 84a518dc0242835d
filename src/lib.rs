// Core modules
pub mod alerts;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod portfolio;
pub mod scheduler;

// Re-export commonly used types
pub use alerts::{AlertEvaluator, AlertEvent, AlertMetric, AlertRule, AlertState, Comparator, NewAlertRule, RearmPolicy};
pub use cache::TimeSeriesCache;
pub use config::Settings;
pub use error::EngineError;
pub use indicators::{IndicatorEngine, IndicatorSnapshot, Reading};
pub use models::*;
pub use portfolio::{PortfolioLedger, PortfolioSnapshot};
pub use scheduler::{AnalysisEngine, CycleReport, Presenter, RefreshScheduler};

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
