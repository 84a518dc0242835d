use crate::models::{cutoff_before, Observation};
use crate::Result;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

/// Redis store for accepted observations
///
/// Uses one sorted set per asset (`observations:{asset}`) scored by
/// timestamp in milliseconds, so time-range loads and pruning are single
/// range commands.
pub struct ObservationStore {
    conn: ConnectionManager,
}

fn key(asset: &str) -> String {
    format!("observations:{}", asset)
}

impl ObservationStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    pub async fn save_observations(&mut self, asset: &str, observations: &[Observation]) -> Result<()> {
        if observations.is_empty() {
            return Ok(());
        }

        let mut members: Vec<(f64, String)> = Vec::with_capacity(observations.len());
        for observation in observations {
            let score = observation.timestamp.timestamp_millis() as f64;
            members.push((score, serde_json::to_string(observation)?));
        }

        self.conn.zadd_multiple::<_, _, _, ()>(key(asset), &members).await?;

        tracing::debug!("Saved {} observations for {} to Redis", observations.len(), asset);
        Ok(())
    }

    /// Observations newer than `now - lookback`, oldest first
    pub async fn load_window(&mut self, asset: &str, lookback: chrono::Duration) -> Result<Vec<Observation>> {
        let cutoff = cutoff_before(lookback);
        let min_score = cutoff.timestamp_millis() as f64;

        let results: Vec<String> = self.conn.zrangebyscore(key(asset), min_score, "+inf").await?;

        let observations = results
            .iter()
            .map(|json| serde_json::from_str::<Observation>(json))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::info!("Loaded {} stored observations for {} from Redis", observations.len(), asset);
        Ok(observations)
    }

    /// Remove observations older than `keep`
    pub async fn cleanup_old(&mut self, asset: &str, keep: chrono::Duration) -> Result<usize> {
        let cutoff = cutoff_before(keep);
        let max_score = cutoff.timestamp_millis() as f64;

        let removed: usize = self.conn.zrembyscore(key(asset), "-inf", max_score).await?;

        if removed > 0 {
            tracing::debug!("Cleaned up {} old observations for {}", removed, asset);
        }

        Ok(removed)
    }

    pub async fn count(&mut self, asset: &str) -> Result<usize> {
        let count: usize = self.conn.zcard(key(asset)).await?;
        Ok(count)
    }
}
