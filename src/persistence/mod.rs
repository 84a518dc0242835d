// Observation store, startup file loaders and CSV export

pub mod export;
pub mod files;
pub mod redis_store;

pub use export::export_top_coins;
pub use files::{load_alert_rules, load_holdings};
pub use redis_store::ObservationStore;
