// Market data sources and concurrent fetching

pub mod coingecko_source;
pub mod synthetic;

pub use coingecko_source::CoinGeckoSource;
pub use synthetic::SyntheticSource;

use crate::error::EngineError;
use crate::models::Observation;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Per-asset outcome of a batched fetch
pub type BatchResult = anyhow::Result<HashMap<String, anyhow::Result<Observation>>>;

/// Produces the latest observation for an asset
pub trait MarketDataSource: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn fetch_observation(&self, asset: &str) -> impl Future<Output = anyhow::Result<Observation>> + Send;

    /// Fetch several assets with one upstream request
    ///
    /// `None` means the source has no batch endpoint and each asset is
    /// fetched on its own. Assets missing from the returned map count as
    /// failed.
    fn fetch_batch(&self, _assets: &[String]) -> impl Future<Output = Option<BatchResult>> + Send {
        async { None }
    }

    /// Recent history used to warm the cache at startup
    ///
    /// Sources without history return nothing.
    fn fetch_history(
        &self,
        _asset: &str,
        _lookback: chrono::Duration,
    ) -> impl Future<Output = anyhow::Result<Vec<Observation>>> + Send {
        async { Ok(Vec::new()) }
    }
}

/// Fetch the latest observation for every asset
///
/// Sources with a batch endpoint get one request bounded by `timeout`;
/// otherwise assets are fetched concurrently, each bounded by `timeout`. A
/// timeout or error is recorded as a `FetchFailure` for the assets it hit.
pub async fn fetch_latest<S: MarketDataSource>(
    source: Arc<S>,
    assets: &[String],
    timeout: Duration,
) -> HashMap<String, Result<Observation, EngineError>> {
    let results = match tokio::time::timeout(timeout, source.fetch_batch(assets)).await {
        Ok(None) => fan_out(&source, assets, timeout).await,
        Ok(Some(Ok(mut batch))) => assets
            .iter()
            .map(|asset| {
                let result = match batch.remove(asset) {
                    Some(Ok(observation)) => Ok(observation),
                    Some(Err(e)) => Err(EngineError::fetch_failure(asset, format!("{:#}", e))),
                    None => Err(EngineError::fetch_failure(asset, "missing from batch response")),
                };
                (asset.clone(), result)
            })
            .collect(),
        Ok(Some(Err(e))) => {
            let reason = format!("{:#}", e);
            fail_all(assets, &reason)
        }
        Err(_) => fail_all(assets, &format!("timed out after {:?}", timeout)),
    };

    for result in results.values() {
        if let Err(e) = result {
            tracing::warn!(source = source.name(), "⚠️  {}", e);
        }
    }

    results
}

fn fail_all(assets: &[String], reason: &str) -> HashMap<String, Result<Observation, EngineError>> {
    assets
        .iter()
        .map(|asset| (asset.clone(), Err(EngineError::fetch_failure(asset, reason))))
        .collect()
}

async fn fan_out<S: MarketDataSource>(
    source: &Arc<S>,
    assets: &[String],
    timeout: Duration,
) -> HashMap<String, Result<Observation, EngineError>> {
    let mut tasks = JoinSet::new();

    for asset in assets {
        let source = Arc::clone(source);
        let asset = asset.clone();

        tasks.spawn(async move {
            let result = match tokio::time::timeout(timeout, source.fetch_observation(&asset)).await {
                Ok(Ok(observation)) => Ok(observation),
                Ok(Err(e)) => Err(EngineError::fetch_failure(&asset, format!("{:#}", e))),
                Err(_) => Err(EngineError::fetch_failure(
                    &asset,
                    format!("timed out after {:?}", timeout),
                )),
            };
            (asset, result)
        });
    }

    let mut results = HashMap::with_capacity(assets.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((asset, result)) => {
                results.insert(asset, result);
            }
            Err(e) => tracing::error!(source = source.name(), "Fetch task failed: {}", e),
        }
    }

    // A panicked task still leaves its asset marked as failed
    for asset in assets {
        results
            .entry(asset.clone())
            .or_insert_with(|| Err(EngineError::fetch_failure(asset, "fetch task aborted")));
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct SlowSource;

    impl MarketDataSource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch_observation(&self, asset: &str) -> anyhow::Result<Observation> {
            match asset {
                "SLOW" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    anyhow::bail!("unreachable")
                }
                "BROKEN" => anyhow::bail!("HTTP 500"),
                _ => Ok(Observation::new(Utc::now(), 100.0, 1.0)?),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failures_are_isolated() {
        let assets: Vec<String> = ["BTC", "SLOW", "BROKEN"].iter().map(|s| s.to_string()).collect();

        let results = fetch_latest(Arc::new(SlowSource), &assets, Duration::from_secs(10)).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results["BTC"].as_ref().unwrap().price, 100.0);
        assert!(matches!(
            &results["SLOW"],
            Err(EngineError::FetchFailure { reason, .. }) if reason.contains("timed out")
        ));
        assert!(matches!(
            &results["BROKEN"],
            Err(EngineError::FetchFailure { reason, .. }) if reason.contains("HTTP 500")
        ));
    }

    /// Answers every cycle with one batch; `HANG` stalls the whole request
    struct BatchSource {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl MarketDataSource for BatchSource {
        fn name(&self) -> &str {
            "batch"
        }

        async fn fetch_observation(&self, _asset: &str) -> anyhow::Result<Observation> {
            anyhow::bail!("per-asset fetch should not be used")
        }

        async fn fetch_batch(&self, assets: &[String]) -> Option<BatchResult> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if assets.iter().any(|a| a == "HANG") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }

            let mut batch: HashMap<String, anyhow::Result<Observation>> = HashMap::new();
            for asset in assets {
                match asset.as_str() {
                    "BTC" => batch.insert(asset.clone(), Observation::new(Utc::now(), 100.0, 1.0).map_err(anyhow::Error::from)),
                    "BROKEN" => batch.insert(asset.clone(), Err(anyhow::anyhow!("price is null"))),
                    _ => None,
                };
            }
            Some(Ok(batch))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_source_fetches_once_per_cycle() {
        let source = Arc::new(BatchSource {
            calls: Default::default(),
        });
        let assets: Vec<String> = ["BTC", "BROKEN", "GONE"].iter().map(|s| s.to_string()).collect();

        let results = fetch_latest(Arc::clone(&source), &assets, Duration::from_secs(10)).await;

        assert_eq!(source.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(results["BTC"].as_ref().unwrap().price, 100.0);
        assert!(matches!(
            &results["BROKEN"],
            Err(EngineError::FetchFailure { reason, .. }) if reason.contains("price is null")
        ));
        assert!(matches!(
            &results["GONE"],
            Err(EngineError::FetchFailure { reason, .. }) if reason.contains("missing")
        ));

        let hung: Vec<String> = ["BTC", "HANG"].iter().map(|s| s.to_string()).collect();
        let results = fetch_latest(source, &hung, Duration::from_secs(10)).await;
        assert!(results
            .values()
            .all(|r| matches!(r, Err(EngineError::FetchFailure { reason, .. }) if reason.contains("timed out"))));
    }

    #[tokio::test]
    async fn test_default_history_is_empty() {
        let history = SlowSource
            .fetch_history("BTC", chrono::Duration::hours(24))
            .await
            .unwrap();
        assert!(history.is_empty());
    }
}
