use crate::api::CoinMarket;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct TopCoinRow<'a> {
    rank: usize,
    id: &'a str,
    symbol: &'a str,
    name: &'a str,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    price_change_percentage_24h: Option<f64>,
}

/// Write the top-coins table to `dir/top_{limit}_coins_{timestamp}.csv`
///
/// The directory is created if needed. Missing values are left empty.
pub fn export_top_coins(dir: &Path, limit: usize, coins: &[CoinMarket], at: DateTime<Utc>) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = dir.join(format!("top_{}_coins_{}.csv", limit, at.format("%Y%m%d_%H%M%S")));
    let mut writer =
        csv::Writer::from_path(&path).with_context(|| format!("Failed to create {}", path.display()))?;

    for (i, coin) in coins.iter().enumerate() {
        writer.serialize(TopCoinRow {
            rank: i + 1,
            id: &coin.id,
            symbol: &coin.symbol,
            name: &coin.name,
            current_price: coin.current_price,
            market_cap: coin.market_cap,
            price_change_percentage_24h: coin.price_change_percentage_24h,
        })?;
    }
    writer.flush()?;

    tracing::info!("Exported {} coins to {}", coins.len(), path.display());
    Ok(path)
}
