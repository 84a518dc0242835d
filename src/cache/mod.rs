// Rolling per-asset observation cache
pub mod time_series;

pub use time_series::{AssetSeries, TimeSeriesCache, Window};
