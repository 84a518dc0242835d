use crate::config::SourceSettings;
use crate::models::Observation;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";
const RATE_LIMIT_RPM: u32 = 30; // Demo API: 30 requests per minute
const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Symbols whose first `/coins/list` match is not the coin people mean
const SYMBOL_OVERRIDES: &[(&str, &str)] = &[
    ("btc", "bitcoin"),
    ("eth", "ethereum"),
    ("xrp", "ripple"),
    ("ada", "cardano"),
    ("doge", "dogecoin"),
];

// Type alias for the rate limiter to simplify signatures
type CoinGeckoRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// CoinGecko API client with symbol resolution and rate limiting
///
/// This struct is cloneable to allow sharing across async tasks.
/// All clones share the same rate limiter and symbol map.
#[derive(Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    vs_currency: String,
    symbol_to_id: Arc<RwLock<HashMap<String, String>>>,
    rate_limiter: Arc<CoinGeckoRateLimiter>,
    backoff_base: Duration,
}

/// Response from /coins/list endpoint
#[derive(Debug, Deserialize)]
struct CoinListEntry {
    id: String,
    symbol: String,
}

/// Row of the /coins/markets endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct CoinMarket {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
}

/// Latest price from /simple/price
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub price: f64,
    pub volume_24h: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Response from /market_chart endpoint
#[derive(Debug, Deserialize)]
pub struct MarketChartData {
    pub prices: Vec<[f64; 2]>,        // [timestamp_ms, price]
    pub total_volumes: Vec<[f64; 2]>, // [timestamp_ms, volume_24h]
}

impl MarketChartData {
    /// Join prices with volumes on timestamp into a strictly increasing series
    ///
    /// Points with invalid values are dropped; a missing volume counts as 0.
    pub fn observations(&self) -> Vec<Observation> {
        let volumes: HashMap<i64, f64> = self
            .total_volumes
            .iter()
            .map(|[ts, volume]| (*ts as i64, *volume))
            .collect();

        let mut observations: Vec<Observation> = self
            .prices
            .iter()
            .filter_map(|[ts, price]| {
                let ms = *ts as i64;
                let timestamp = Utc.timestamp_millis_opt(ms).single()?;
                let volume = volumes.get(&ms).copied().unwrap_or(0.0);
                Observation::new(timestamp, *price, volume).ok()
            })
            .collect();

        observations.sort_by_key(|o| o.timestamp);
        observations.dedup_by_key(|o| o.timestamp);
        observations
    }
}

impl CoinGeckoClient {
    /// Create a client; the symbol map starts with the fixed overrides only
    pub fn new(settings: &SourceSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).context("Rate limit must be non-zero")?);

        let symbol_to_id = SYMBOL_OVERRIDES
            .iter()
            .map(|(symbol, id)| (symbol.to_string(), id.to_string()))
            .collect();

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            vs_currency: settings.vs_currency.to_lowercase(),
            symbol_to_id: Arc::new(RwLock::new(symbol_to_id)),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Override the base retry delay (doubles on every attempt)
    pub fn with_backoff(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn vs_currency(&self) -> &str {
        &self.vs_currency
    }

    /// Make a rate-limited API request with retry logic
    async fn make_request(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);

        let mut params: Vec<(&str, String)> = query.to_vec();
        if let Some(key) = &self.api_key {
            params.push(("x_cg_demo_api_key", key.clone()));
        }

        for attempt in 1..=MAX_RETRIES {
            // Wait for rate limiter
            self.rate_limiter.until_ready().await;

            let backoff = self.backoff_base * 2u32.pow(attempt - 1);

            match self.client.get(&url).query(&params).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if (status.as_u16() == 429 || status.is_server_error()) && attempt < MAX_RETRIES {
                        tracing::warn!(
                            "CoinGecko returned {} for {}, retrying in {:?} (attempt {}/{})",
                            status,
                            path,
                            backoff,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    // Other errors (4xx) - don't retry
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    anyhow::bail!("CoinGecko API error ({}): {}", status, error_text);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!(
                        "Network error: {}, retrying in {:?} (attempt {}/{})",
                        e,
                        backoff,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => anyhow::bail!("Network error after {} retries: {}", MAX_RETRIES, e),
            }
        }

        anyhow::bail!("Failed after {} retries", MAX_RETRIES)
    }

    /// Load the symbol -> id map from /coins/list
    ///
    /// The fixed overrides always win over list entries.
    pub async fn load_coin_list(&self) -> Result<usize> {
        tracing::info!("Loading CoinGecko coin list...");

        let coins: Vec<CoinListEntry> = self
            .make_request("coins/list", &[])
            .await?
            .json()
            .await
            .context("Failed to parse coin list")?;

        let mut map: HashMap<String, String> = HashMap::with_capacity(coins.len());
        for coin in coins {
            map.insert(coin.symbol.to_lowercase(), coin.id);
        }
        for (symbol, id) in SYMBOL_OVERRIDES {
            map.insert(symbol.to_string(), id.to_string());
        }

        let count = map.len();
        *self.symbol_to_id.write().await = map;

        tracing::info!("Loaded {} CoinGecko symbols", count);
        Ok(count)
    }

    /// Convert a symbol or coin id to a CoinGecko coin id
    ///
    /// Unknown input is assumed to already be an id.
    pub async fn resolve_coin_id(&self, input: &str) -> String {
        let key = input.trim().to_lowercase();
        let map = self.symbol_to_id.read().await;

        match map.get(&key) {
            Some(id) => {
                tracing::debug!("Resolved {} to {}", input, id);
                id.clone()
            }
            None => key,
        }
    }

    /// Latest price, 24h volume and update time for each coin id
    pub async fn simple_price(&self, ids: &[String]) -> Result<HashMap<String, PriceQuote>> {
        let query = [
            ("ids", ids.join(",")),
            ("vs_currencies", self.vs_currency.clone()),
            ("include_24hr_vol", "true".to_string()),
            ("include_last_updated_at", "true".to_string()),
        ];

        let raw: HashMap<String, HashMap<String, Option<f64>>> = self
            .make_request("simple/price", &query)
            .await?
            .json()
            .await
            .context("Failed to parse simple price")?;

        let volume_key = format!("{}_24h_vol", self.vs_currency);
        let quotes = raw
            .into_iter()
            .filter_map(|(id, fields)| {
                let price = fields.get(&self.vs_currency).copied().flatten()?;
                let volume_24h = fields.get(&volume_key).copied().flatten().unwrap_or(0.0);
                let last_updated = fields
                    .get("last_updated_at")
                    .copied()
                    .flatten()
                    .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());

                Some((
                    id,
                    PriceQuote {
                        price,
                        volume_24h,
                        last_updated,
                    },
                ))
            })
            .collect();

        Ok(quotes)
    }

    /// Top coins by market cap
    pub async fn top_coins(&self, limit: usize) -> Result<Vec<CoinMarket>> {
        let query = [
            ("vs_currency", self.vs_currency.clone()),
            ("order", "market_cap_desc".to_string()),
            ("per_page", limit.to_string()),
            ("page", "1".to_string()),
            ("sparkline", "false".to_string()),
        ];

        let coins: Vec<CoinMarket> = self
            .make_request("coins/markets", &query)
            .await?
            .json()
            .await
            .context("Failed to parse coin markets")?;

        tracing::debug!("Fetched {} coins by market cap", coins.len());
        Ok(coins)
    }

    /// Fetch market chart data (price and volume time series)
    pub async fn market_chart(&self, coin_id: &str, days: u32) -> Result<MarketChartData> {
        let query = [
            ("vs_currency", self.vs_currency.clone()),
            ("days", days.to_string()),
        ];

        tracing::debug!("Fetching market chart for {} ({}d)", coin_id, days);

        let data: MarketChartData = self
            .make_request(&format!("coins/{}/market_chart", coin_id), &query)
            .await?
            .json()
            .await
            .context("Failed to parse market chart")?;

        tracing::debug!("Fetched {} price points for {}", data.prices.len(), coin_id);

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> CoinGeckoClient {
        let settings = SourceSettings {
            base_url: server.url(),
            api_key: None,
            vs_currency: "usd".to_string(),
        };
        CoinGeckoClient::new(&settings)
            .unwrap()
            .with_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_resolve_uses_overrides_before_list_is_loaded() {
        let client = CoinGeckoClient::new(&SourceSettings::default()).unwrap();

        assert_eq!(client.resolve_coin_id("BTC").await, "bitcoin");
        assert_eq!(client.resolve_coin_id("xrp").await, "ripple");
        assert_eq!(client.resolve_coin_id("Solana").await, "solana");
    }

    #[tokio::test]
    async fn test_load_coin_list() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/coins/list")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"id":"solana","symbol":"sol","name":"Solana"},
                    {"id":"binance-peg-cardano","symbol":"ada","name":"Binance-Peg Cardano"},
                    {"id":"dogwifcoin","symbol":"wif","name":"dogwifhat"}
                ]"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        client.load_coin_list().await.unwrap();
        mock.assert_async().await;

        assert_eq!(client.resolve_coin_id("SOL").await, "solana");
        assert_eq!(client.resolve_coin_id("wif").await, "dogwifcoin");
        // Override beats the list entry
        assert_eq!(client.resolve_coin_id("ada").await, "cardano");
    }

    #[tokio::test]
    async fn test_simple_price() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/simple/price")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("ids".into(), "bitcoin,ethereum".into()),
                Matcher::UrlEncoded("vs_currencies".into(), "usd".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "bitcoin":{"usd":67187.3,"usd_24h_vol":31124558742.1,"last_updated_at":1711356300},
                    "ethereum":{"usd":3462.1,"usd_24h_vol":null,"last_updated_at":1711356300}
                }"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let quotes = client
            .simple_price(&["bitcoin".to_string(), "ethereum".to_string()])
            .await
            .unwrap();
        mock.assert_async().await;

        let btc = &quotes["bitcoin"];
        assert_eq!(btc.price, 67187.3);
        assert_eq!(btc.volume_24h, 31124558742.1);
        assert_eq!(btc.last_updated.unwrap().timestamp(), 1711356300);
        assert_eq!(quotes["ethereum"].volume_24h, 0.0);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/coins/markets")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = client_for(&server);
        let result = client.top_coins(10).await;

        // Every attempt got a 503, the last one is surfaced
        failing.assert_async().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_client_errors_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/coins/nope/market_chart")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"error":"coin not found"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.market_chart("nope", 1).await.unwrap_err();

        mock.assert_async().await;
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_top_coins() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/coins/markets")
            .match_query(Matcher::UrlEncoded("per_page".into(), "2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"id":"bitcoin","symbol":"btc","name":"Bitcoin","current_price":67000.0,"market_cap":1.3e12,"price_change_percentage_24h":1.5},
                    {"id":"ethereum","symbol":"eth","name":"Ethereum","current_price":3400.0,"market_cap":4.1e11,"price_change_percentage_24h":null}
                ]"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let coins = client.top_coins(2).await.unwrap();

        assert_eq!(coins.len(), 2);
        assert_eq!(coins[0].symbol, "btc");
        assert_eq!(coins[1].price_change_percentage_24h, None);
    }

    #[test]
    fn test_market_chart_observations() {
        let data = MarketChartData {
            prices: vec![
                [1_711_000_000_000.0, 100.0],
                [1_711_000_300_000.0, 101.0],
                [1_711_000_300_000.0, 101.5],
                [1_711_000_600_000.0, -1.0],
                [1_711_000_900_000.0, 103.0],
            ],
            total_volumes: vec![[1_711_000_000_000.0, 5_000.0], [1_711_000_300_000.0, 5_100.0]],
        };

        let observations = data.observations();
        let prices: Vec<f64> = observations.iter().map(|o| o.price).collect();

        assert_eq!(prices, vec![100.0, 101.0, 103.0]);
        assert_eq!(observations[0].volume, 5_000.0);
        assert_eq!(observations[2].volume, 0.0);
        assert!(observations.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_market_chart_live() {
        let client = CoinGeckoClient::new(&SourceSettings::default()).unwrap();

        let data = client.market_chart("bitcoin", 1).await.unwrap();

        // Should have ~287 price points for 1 day
        assert!(
            data.prices.len() > 200,
            "Expected >200 price points, got {}",
            data.prices.len()
        );
        assert_eq!(data.prices.len(), data.total_volumes.len());
        assert!(!data.observations().is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_simple_price_live() {
        let client = CoinGeckoClient::new(&SourceSettings::default()).unwrap();
        let quotes = client.simple_price(&["bitcoin".to_string()]).await.unwrap();

        assert!(quotes["bitcoin"].price > 0.0);
    }
}
