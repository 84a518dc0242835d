pub mod coingecko;

pub use coingecko::{CoinGeckoClient, CoinMarket, MarketChartData, PriceQuote};
