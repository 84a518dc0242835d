// Refresh cycle orchestration

pub mod engine;
pub mod runner;

pub use engine::{AnalysisEngine, CycleReport};
pub use runner::{stop_after, Presenter, RefreshScheduler};
