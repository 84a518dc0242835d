// Portfolio holdings and valuation

pub mod ledger;

pub use ledger::{AssetValuation, PortfolioLedger, PortfolioSnapshot};
