use crate::error::EngineError;
use crate::models::Holding;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Valuation of one asset across all exchanges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetValuation {
    pub asset: String,
    pub quantity: f64,
    pub price: f64,
    pub value: f64,
    pub cost: f64,
    pub unrealized_pnl: f64,
    /// Share of the total portfolio value, in percent
    pub allocation_pct: f64,
}

/// Derived portfolio view; recomputed from scratch on every call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub total_value: f64,
    /// Cost of the priced holdings
    pub total_cost: f64,
    pub unrealized_pnl: f64,
    pub assets: Vec<AssetValuation>,
    /// Held assets with no current price; they contribute no value
    pub unpriced: Vec<String>,
}

impl PortfolioSnapshot {
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty() && self.unpriced.is_empty()
    }

    pub fn asset(&self, asset: &str) -> Option<&AssetValuation> {
        self.assets.iter().find(|a| a.asset == asset)
    }
}

/// User holdings keyed by (asset, exchange)
#[derive(Debug, Default)]
pub struct PortfolioLedger {
    holdings: Vec<Holding>,
}

impl PortfolioLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger from loaded holdings, merging duplicate positions
    pub fn with_holdings(holdings: Vec<Holding>) -> Result<Self, EngineError> {
        let mut ledger = Self::new();
        for holding in holdings {
            ledger.add_holding(holding)?;
        }

        tracing::info!("Restored {} holdings", ledger.holdings.len());
        Ok(ledger)
    }

    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    pub fn holding(&self, asset: &str, exchange: &str) -> Option<&Holding> {
        self.holdings
            .iter()
            .find(|h| h.asset == asset && h.exchange == exchange)
    }

    /// Distinct assets held on any exchange
    pub fn assets(&self) -> Vec<String> {
        let mut assets: Vec<String> = self.holdings.iter().map(|h| h.asset.clone()).collect();
        assets.sort();
        assets.dedup();
        assets
    }

    /// Add a holding, accumulating into an existing position
    ///
    /// The cost basis of an accumulated position is the quantity-weighted
    /// average of the old and new lots.
    pub fn add_holding(&mut self, holding: Holding) -> Result<(), EngineError> {
        validate_amount("quantity", holding.quantity)?;
        validate_amount("cost basis", holding.cost_basis)?;

        if let Some(existing) = self.holding_mut(&holding.asset, &holding.exchange) {
            let total_cost = existing.total_cost() + holding.total_cost();
            existing.quantity += holding.quantity;
            existing.cost_basis = if existing.quantity > 0.0 {
                total_cost / existing.quantity
            } else {
                0.0
            };

            tracing::info!(
                "Accumulated {} {} on {} (avg cost: ${:.2}, total qty: {:.4})",
                holding.quantity,
                existing.asset,
                existing.exchange,
                existing.cost_basis,
                existing.quantity
            );
            return Ok(());
        }

        tracing::info!(
            "Added holding {} {} on {} @ ${:.2}",
            holding.quantity,
            holding.asset,
            holding.exchange,
            holding.cost_basis
        );
        self.holdings.push(holding);
        Ok(())
    }

    /// Remove part or all of a holding
    ///
    /// Removing the full quantity deletes the position. The cost basis of
    /// what remains is unchanged.
    pub fn remove_holding(&mut self, asset: &str, exchange: &str, quantity: f64) -> Result<(), EngineError> {
        validate_amount("quantity", quantity)?;
        self.adjust_quantity(asset, exchange, -quantity)
    }

    /// Apply a signed quantity change to an existing holding
    pub fn adjust_quantity(&mut self, asset: &str, exchange: &str, delta: f64) -> Result<(), EngineError> {
        if !delta.is_finite() {
            return Err(EngineError::configuration(format!(
                "quantity change must be finite, got {}",
                delta
            )));
        }

        let index = self
            .holdings
            .iter()
            .position(|h| h.asset == asset && h.exchange == exchange)
            .ok_or_else(|| EngineError::UnknownHolding {
                asset: asset.to_string(),
                exchange: exchange.to_string(),
            })?;

        let held = self.holdings[index].quantity;
        let remaining = held + delta;

        if remaining < 0.0 {
            return Err(EngineError::InsufficientHolding {
                asset: asset.to_string(),
                exchange: exchange.to_string(),
                requested: -delta,
                held,
            });
        }

        if remaining == 0.0 {
            self.holdings.remove(index);
            tracing::info!("Closed holding {} on {}", asset, exchange);
        } else {
            self.holdings[index].quantity = remaining;
        }

        Ok(())
    }

    /// Value the ledger against the latest prices
    pub fn snapshot(&self, prices: &HashMap<String, f64>) -> PortfolioSnapshot {
        // (quantity, cost) per asset across exchanges
        let mut totals: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
        for holding in &self.holdings {
            let entry = totals.entry(holding.asset.as_str()).or_insert((0.0, 0.0));
            entry.0 += holding.quantity;
            entry.1 += holding.total_cost();
        }

        let mut snapshot = PortfolioSnapshot::default();

        for (asset, (quantity, cost)) in totals {
            let Some(&price) = prices.get(asset) else {
                snapshot.unpriced.push(asset.to_string());
                continue;
            };

            let value = quantity * price;
            snapshot.total_value += value;
            snapshot.total_cost += cost;
            snapshot.assets.push(AssetValuation {
                asset: asset.to_string(),
                quantity,
                price,
                value,
                cost,
                unrealized_pnl: value - cost,
                allocation_pct: 0.0,
            });
        }

        snapshot.unrealized_pnl = snapshot.total_value - snapshot.total_cost;

        if snapshot.total_value > 0.0 {
            for valuation in snapshot.assets.iter_mut() {
                valuation.allocation_pct = valuation.value / snapshot.total_value * 100.0;
            }
        }

        snapshot
    }

    fn holding_mut(&mut self, asset: &str, exchange: &str) -> Option<&mut Holding> {
        self.holdings
            .iter_mut()
            .find(|h| h.asset == asset && h.exchange == exchange)
    }
}

fn validate_amount(field: &str, amount: f64) -> Result<(), EngineError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(EngineError::configuration(format!(
            "{} must be a non-negative number, got {}",
            field, amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(a, p)| (a.to_string(), *p)).collect()
    }

    #[test]
    fn test_single_holding_pnl() {
        let mut ledger = PortfolioLedger::new();
        ledger.add_holding(Holding::new("BTC", 2.0, 10_000.0, "binance")).unwrap();

        let snapshot = ledger.snapshot(&prices(&[("BTC", 15_000.0)]));

        assert_eq!(snapshot.total_value, 30_000.0);
        assert_eq!(snapshot.total_cost, 20_000.0);
        assert_eq!(snapshot.unrealized_pnl, 10_000.0);
        assert_eq!(snapshot.asset("BTC").unwrap().allocation_pct, 100.0);
    }

    #[test]
    fn test_empty_ledger_snapshot() {
        let ledger = PortfolioLedger::new();
        let snapshot = ledger.snapshot(&prices(&[("BTC", 15_000.0)]));

        assert_eq!(snapshot.total_value, 0.0);
        assert_eq!(snapshot.unrealized_pnl, 0.0);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_accumulation_weights_cost_basis() {
        let mut ledger = PortfolioLedger::new();
        ledger.add_holding(Holding::new("ETH", 1.0, 1_000.0, "kraken")).unwrap();
        ledger.add_holding(Holding::new("ETH", 3.0, 2_000.0, "kraken")).unwrap();

        let holding = ledger.holding("ETH", "kraken").unwrap();
        assert_eq!(holding.quantity, 4.0);
        assert_eq!(holding.cost_basis, 1_750.0);
        assert_eq!(ledger.holdings().len(), 1);
    }

    #[test]
    fn test_same_asset_on_two_exchanges() {
        let mut ledger = PortfolioLedger::new();
        ledger.add_holding(Holding::new("BTC", 1.0, 10_000.0, "binance")).unwrap();
        ledger.add_holding(Holding::new("BTC", 1.0, 20_000.0, "coinbase")).unwrap();
        ledger.add_holding(Holding::new("ETH", 10.0, 1_000.0, "coinbase")).unwrap();

        assert_eq!(ledger.holdings().len(), 3);
        assert_eq!(ledger.assets(), vec!["BTC", "ETH"]);

        let snapshot = ledger.snapshot(&prices(&[("BTC", 20_000.0), ("ETH", 2_000.0)]));
        let btc = snapshot.asset("BTC").unwrap();

        assert_eq!(btc.quantity, 2.0);
        assert_eq!(btc.value, 40_000.0);
        assert_eq!(btc.unrealized_pnl, 10_000.0);
        assert_eq!(snapshot.total_value, 60_000.0);

        let allocation: f64 = snapshot.assets.iter().map(|a| a.allocation_pct).sum();
        assert!((allocation - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_remove_more_than_held_fails() {
        let mut ledger = PortfolioLedger::new();
        ledger.add_holding(Holding::new("BTC", 2.0, 10_000.0, "binance")).unwrap();

        let err = ledger.remove_holding("BTC", "binance", 3.0).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientHolding { held, .. } if held == 2.0));
        assert_eq!(ledger.holding("BTC", "binance").unwrap().quantity, 2.0);
    }

    #[test]
    fn test_remove_all_deletes_holding() {
        let mut ledger = PortfolioLedger::new();
        ledger.add_holding(Holding::new("BTC", 2.0, 10_000.0, "binance")).unwrap();

        ledger.remove_holding("BTC", "binance", 0.5).unwrap();
        let holding = ledger.holding("BTC", "binance").unwrap();
        assert_eq!(holding.quantity, 1.5);
        assert_eq!(holding.cost_basis, 10_000.0);

        ledger.remove_holding("BTC", "binance", 1.5).unwrap();
        assert!(ledger.holding("BTC", "binance").is_none());
    }

    #[test]
    fn test_adjust_quantity() {
        let mut ledger = PortfolioLedger::new();
        ledger.add_holding(Holding::new("SOL", 10.0, 100.0, "wallet")).unwrap();

        ledger.adjust_quantity("SOL", "wallet", 5.0).unwrap();
        assert_eq!(ledger.holding("SOL", "wallet").unwrap().quantity, 15.0);

        assert!(matches!(
            ledger.adjust_quantity("SOL", "wallet", -20.0),
            Err(EngineError::InsufficientHolding { .. })
        ));
        assert!(matches!(
            ledger.adjust_quantity("SOL", "binance", 1.0),
            Err(EngineError::UnknownHolding { .. })
        ));
    }

    #[test]
    fn test_invalid_amounts_rejected() {
        let mut ledger = PortfolioLedger::new();

        assert!(ledger.add_holding(Holding::new("BTC", -1.0, 10_000.0, "binance")).is_err());
        assert!(ledger.add_holding(Holding::new("BTC", 1.0, f64::NAN, "binance")).is_err());
        assert!(ledger.holdings().is_empty());
    }

    #[test]
    fn test_unpriced_holdings_listed() {
        let mut ledger = PortfolioLedger::new();
        ledger.add_holding(Holding::new("BTC", 1.0, 10_000.0, "binance")).unwrap();
        ledger.add_holding(Holding::new("OBSCURE", 1_000.0, 0.01, "wallet")).unwrap();

        let snapshot = ledger.snapshot(&prices(&[("BTC", 12_000.0)]));

        assert_eq!(snapshot.unpriced, vec!["OBSCURE"]);
        assert_eq!(snapshot.total_value, 12_000.0);
        assert_eq!(snapshot.unrealized_pnl, 2_000.0);
        assert!(snapshot.asset("OBSCURE").is_none());
    }
}
