use super::engine::{AnalysisEngine, CycleReport};
use crate::config::Settings;
use crate::feed::{fetch_latest, MarketDataSource};
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Receives each completed cycle's report
pub trait Presenter: Send + Sync {
    fn publish(&self, report: &CycleReport);
}

/// Held while a cycle runs; releases the running flag on drop
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Resolve when `signal` does, or once `limit` has elapsed
pub async fn stop_after<F: Future<Output = ()>>(signal: F, limit: Option<Duration>) {
    let Some(limit) = limit else {
        return signal.await;
    };

    tokio::select! {
        _ = signal => {}
        _ = tokio::time::sleep(limit) => {
            tracing::info!("⏱️  Run time of {:?} elapsed", limit);
        }
    }
}

/// Drives fetch → append → recompute → alerts → revalue → publish
pub struct RefreshScheduler<S> {
    source: Arc<S>,
    engine: Arc<Mutex<AnalysisEngine>>,
    presenters: Vec<Arc<dyn Presenter>>,
    reports: watch::Sender<Option<Arc<CycleReport>>>,
    streams: Vec<mpsc::UnboundedSender<Arc<CycleReport>>>,
    running: AtomicBool,
    interval: Duration,
    fetch_timeout: Duration,
}

impl<S: MarketDataSource> RefreshScheduler<S> {
    pub fn new(source: S, engine: AnalysisEngine, settings: &Settings) -> Self {
        let (reports, _) = watch::channel(None);

        Self {
            source: Arc::new(source),
            engine: Arc::new(Mutex::new(engine)),
            presenters: Vec::new(),
            reports,
            streams: Vec::new(),
            running: AtomicBool::new(false),
            interval: settings.refresh_interval(),
            fetch_timeout: settings.fetch_timeout(),
        }
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenters.push(presenter);
        self
    }

    /// Latest report, updated after every completed cycle
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<CycleReport>>> {
        self.reports.subscribe()
    }

    /// Every report in cycle order, for consumers that must not miss one
    ///
    /// The stream ends once the scheduler is dropped and buffered reports
    /// have been received.
    pub fn stream_reports(&mut self) -> mpsc::UnboundedReceiver<Arc<CycleReport>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.push(tx);
        rx
    }

    /// Shared handle for rule and holding mutations between cycles
    pub fn engine(&self) -> Arc<Mutex<AnalysisEngine>> {
        Arc::clone(&self.engine)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Warm the cache with recent history from the source
    ///
    /// Only assets with nothing cached yet are fetched, so history loaded
    /// from the store for some assets does not stop the rest from being
    /// backfilled.
    pub async fn seed_history(&self, lookback: chrono::Duration) -> usize {
        let assets: Vec<String> = {
            let engine = self.engine.lock().await;
            engine
                .tracked_assets()
                .into_iter()
                .filter(|asset| engine.cache().len(asset) == 0)
                .collect()
        };
        let mut total = 0;

        for asset in &assets {
            match self.source.fetch_history(asset, lookback).await {
                Ok(history) if history.is_empty() => {}
                Ok(history) => total += self.engine.lock().await.seed_history(asset, history),
                Err(e) => tracing::warn!(asset = %asset, "Failed to load history: {:#}", e),
            }
        }

        total
    }

    /// Run one refresh cycle
    ///
    /// Returns None without doing anything when a cycle is already in
    /// progress; overlapping cycles are skipped, never queued.
    pub async fn run_cycle(&self) -> Option<Arc<CycleReport>> {
        let Some(_guard) = CycleGuard::acquire(&self.running) else {
            tracing::warn!("⏭️  Previous cycle still running, skipping this one");
            return None;
        };

        let assets = self.engine.lock().await.tracked_assets();
        tracing::debug!(source = self.source.name(), assets = assets.len(), "🔄 Fetching");

        let batch = fetch_latest(Arc::clone(&self.source), &assets, self.fetch_timeout).await;

        let report = {
            let mut engine = self.engine.lock().await;
            Arc::new(engine.apply_cycle(batch, Utc::now()))
        };

        for presenter in &self.presenters {
            presenter.publish(&report);
        }
        self.reports.send_replace(Some(Arc::clone(&report)));
        for stream in &self.streams {
            if stream.send(Arc::clone(&report)).is_err() {
                tracing::debug!("Report stream receiver dropped");
            }
        }

        Some(report)
    }

    /// Run cycles on the configured cadence until `shutdown` resolves
    ///
    /// The first cycle starts immediately. Ticks missed while a cycle was
    /// running are dropped.
    pub async fn run<F: Future<Output = ()>>(&self, shutdown: F) {
        let mut ticker = interval_at(Instant::now(), self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);

        tracing::info!(
            "🔄 Refresh loop starting (every {:?}, timeout {:?})",
            self.interval,
            self.fetch_timeout
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Refresh loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
    }
}
