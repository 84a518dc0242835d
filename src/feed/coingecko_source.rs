use super::{BatchResult, MarketDataSource};
use crate::api::CoinGeckoClient;
use crate::models::{cutoff_before, Observation};
use anyhow::Context;
use chrono::Utc;

/// Live prices from CoinGecko `/simple/price`
///
/// Observations are stamped with the fetch time so that polls are strictly
/// ordered even when CoinGecko has not refreshed its quote. A refresh cycle
/// asks for every asset in one request.
pub struct CoinGeckoSource {
    client: CoinGeckoClient,
}

impl CoinGeckoSource {
    pub fn new(client: CoinGeckoClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &CoinGeckoClient {
        &self.client
    }

    async fn fetch_prices(&self, assets: &[String]) -> BatchResult {
        let mut coin_ids = Vec::with_capacity(assets.len());
        for asset in assets {
            coin_ids.push(self.client.resolve_coin_id(asset).await);
        }

        let mut ids = coin_ids.clone();
        ids.sort();
        ids.dedup();

        let quotes = self.client.simple_price(&ids).await?;
        let now = Utc::now();

        tracing::debug!(
            assets = assets.len(),
            quotes = quotes.len(),
            "Fetched prices"
        );

        Ok(assets
            .iter()
            .zip(coin_ids)
            .map(|(asset, coin_id)| {
                let result = quotes
                    .get(&coin_id)
                    .with_context(|| format!("No {} price for {}", self.client.vs_currency(), coin_id))
                    .and_then(|quote| Ok(Observation::new(now, quote.price, quote.volume_24h)?));
                (asset.clone(), result)
            })
            .collect())
    }
}

impl MarketDataSource for CoinGeckoSource {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn fetch_observation(&self, asset: &str) -> anyhow::Result<Observation> {
        let mut prices = self.fetch_prices(&[asset.to_string()]).await?;
        prices
            .remove(asset)
            .with_context(|| format!("No price returned for {}", asset))?
    }

    async fn fetch_batch(&self, assets: &[String]) -> Option<BatchResult> {
        Some(self.fetch_prices(assets).await)
    }

    async fn fetch_history(
        &self,
        asset: &str,
        lookback: chrono::Duration,
    ) -> anyhow::Result<Vec<Observation>> {
        let coin_id = self.client.resolve_coin_id(asset).await;
        let days = u32::try_from(lookback.num_days().max(0))
            .unwrap_or(u32::MAX)
            .saturating_add(1);

        let chart = self.client.market_chart(&coin_id, days).await?;
        let cutoff = cutoff_before(lookback);

        Ok(chart
            .observations()
            .into_iter()
            .filter(|o| o.timestamp >= cutoff)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceSettings;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_fetch_observation_resolves_symbol() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/simple/price")
            .match_query(Matcher::UrlEncoded("ids".into(), "bitcoin".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"bitcoin":{"usd":64000.0,"usd_24h_vol":2.5e10,"last_updated_at":1711356300}}"#)
            .create_async()
            .await;

        let settings = SourceSettings {
            base_url: server.url(),
            ..SourceSettings::default()
        };
        let source = CoinGeckoSource::new(CoinGeckoClient::new(&settings).unwrap());

        let observation = source.fetch_observation("BTC").await.unwrap();
        mock.assert_async().await;

        assert_eq!(observation.price, 64_000.0);
        assert_eq!(observation.volume, 2.5e10);
    }

    #[tokio::test]
    async fn test_missing_quote_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/simple/price")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        let settings = SourceSettings {
            base_url: server.url(),
            ..SourceSettings::default()
        };
        let source = CoinGeckoSource::new(CoinGeckoClient::new(&settings).unwrap());

        assert!(source.fetch_observation("not-a-coin").await.is_err());
    }

    #[tokio::test]
    async fn test_batch_uses_one_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/simple/price")
            .match_query(Matcher::UrlEncoded("ids".into(), "bitcoin,ethereum,not-a-coin".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"bitcoin":{"usd":64000.0,"usd_24h_vol":2.5e10},"ethereum":{"usd":3100.0,"usd_24h_vol":1.2e10}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let settings = SourceSettings {
            base_url: server.url(),
            ..SourceSettings::default()
        };
        let source = CoinGeckoSource::new(CoinGeckoClient::new(&settings).unwrap());
        let assets: Vec<String> = ["eth", "btc", "not-a-coin", "bitcoin"].iter().map(|s| s.to_string()).collect();

        let batch = source.fetch_batch(&assets).await.unwrap().unwrap();
        mock.assert_async().await;

        assert_eq!(batch.len(), 4);
        assert_eq!(batch["eth"].as_ref().unwrap().price, 3_100.0);
        assert_eq!(batch["btc"].as_ref().unwrap().price, 64_000.0);
        assert_eq!(batch["bitcoin"].as_ref().unwrap().price, 64_000.0);
        assert!(batch["not-a-coin"].is_err());
    }

    #[tokio::test]
    #[ignore] // Requires live API
    async fn test_fetch_history_live() {
        let source = CoinGeckoSource::new(CoinGeckoClient::new(&SourceSettings::default()).unwrap());
        let history = source
            .fetch_history("eth", chrono::Duration::hours(6))
            .await
            .unwrap();

        assert!(!history.is_empty());
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}
