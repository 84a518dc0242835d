use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cryptoanalyzer::api::CoinGeckoClient;
use cryptoanalyzer::cache::TimeSeriesCache;
use cryptoanalyzer::config::{Settings, Theme};
use cryptoanalyzer::feed::{CoinGeckoSource, MarketDataSource, SyntheticSource};
use cryptoanalyzer::indicators::{IndicatorEngine, IndicatorSnapshot, Reading};
use cryptoanalyzer::persistence::{export_top_coins, load_alert_rules, load_holdings, ObservationStore};
use cryptoanalyzer::scheduler::stop_after;
use cryptoanalyzer::{AnalysisEngine, CycleReport, Presenter, RefreshScheduler};
use crossterm::style::{style, Color, StyledContent, Stylize};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// Prune stored observations every this many cycles
const CLEANUP_EVERY_CYCLES: u64 = 60;

// How long shutdown waits for pending observations to reach Redis
const PERSIST_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "cryptoanalyzer", about = "Crypto market data analysis engine")]
struct Cli {
    /// Path to a TOML settings file (default: ./cryptoanalyzer.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Track assets live and print every refresh cycle (default)
    Live {
        /// Use the synthetic random-walk source instead of CoinGecko
        #[arg(long)]
        offline: bool,

        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Show the top coins by market cap
    Top {
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Also write the table as CSV into this directory
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// One-shot historical analysis of a coin
    Analyze {
        /// Symbol or CoinGecko id (e.g. btc, ethereum)
        coin: String,
        #[arg(long, default_value_t = 90)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.debug);

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    let command = cli.command.unwrap_or(Command::Live {
        offline: false,
        duration: None,
    });

    match command {
        Command::Live { offline, duration } => {
            run_live(settings, offline, duration.map(std::time::Duration::from_secs)).await
        }
        Command::Top { limit, export } => show_top_coins(&settings, limit, export.as_deref()).await,
        Command::Analyze { coin, days } => analyze_coin(&settings, &coin, days).await,
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging(debug: bool) {
    let default = if debug {
        "cryptoanalyzer=debug"
    } else {
        "cryptoanalyzer=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

async fn connect_to_redis(settings: &Settings) -> Option<ObservationStore> {
    let redis_url = settings.redis_url.as_deref()?;

    match ObservationStore::new(redis_url).await {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Redis ({}), continuing without observation store",
                e
            );
            None
        }
    }
}

fn build_engine(settings: &Settings) -> Result<AnalysisEngine> {
    let holdings = load_holdings(settings.holdings_path.as_deref())?;
    let rules = load_alert_rules(settings.alerts_path.as_deref())?;

    AnalysisEngine::with_state(settings, holdings, rules).context("Invalid holdings or alert rules")
}

// ============================================================================
// Live Mode
// ============================================================================

async fn run_live(settings: Settings, offline: bool, duration: Option<std::time::Duration>) -> Result<()> {
    tracing::info!("🚀 CryptoAnalyzer starting");

    let engine = build_engine(&settings)?;

    if offline {
        let seed = chrono::Utc::now().timestamp() as u64;
        tracing::info!("Using synthetic prices (seed {})", seed);
        return run_with_source(SyntheticSource::new(seed), engine, settings, duration).await;
    }

    let client = CoinGeckoClient::new(&settings.source)?;
    if let Err(e) = client.load_coin_list().await {
        tracing::warn!("Failed to load coin list ({:#}), using built-in symbols only", e);
    }

    run_with_source(CoinGeckoSource::new(client), engine, settings, duration).await
}

async fn run_with_source<S: MarketDataSource>(
    source: S,
    engine: AnalysisEngine,
    settings: Settings,
    duration: Option<std::time::Duration>,
) -> Result<()> {
    let presenter = Arc::new(TerminalPresenter::new(settings.theme));
    let mut scheduler = RefreshScheduler::new(source, engine, &settings).with_presenter(presenter);

    let lookback = settings.lookback()?;
    let mut store = connect_to_redis(&settings).await;

    // Warm the cache from stored observations, then backfill the assets the
    // store had nothing for from the source
    let mut warmed = 0;
    if let Some(store) = store.as_mut() {
        let assets = scheduler.engine().lock().await.tracked_assets();
        for asset in &assets {
            match store.load_window(asset, lookback).await {
                Ok(observations) if !observations.is_empty() => {
                    warmed += scheduler.engine().lock().await.seed_history(asset, observations);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to load {} from Redis: {}", asset, e),
            }
        }
    }
    warmed += scheduler.seed_history(lookback).await;
    tracing::info!("📚 Warmed cache with {} observations", warmed);

    let persist_task = store.map(|store| {
        let reports = scheduler.stream_reports();
        tokio::spawn(persist_observations(store, reports, lookback))
    });

    tracing::info!("\nPress Ctrl+C to stop...\n");

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
        tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
    };
    scheduler.run(stop_after(ctrl_c, duration)).await;

    // Dropping the scheduler ends the report stream; let the store catch up
    drop(scheduler);
    if let Some(task) = persist_task {
        match tokio::time::timeout(PERSIST_DRAIN_TIMEOUT, task).await {
            Ok(Ok(())) => tracing::info!("💾 Saved final observations"),
            Ok(Err(e)) => tracing::error!("Persistence task failed: {}", e),
            Err(_) => tracing::warn!("Timed out saving final observations"),
        }
    }

    tracing::info!("👋 CryptoAnalyzer stopped");
    Ok(())
}

/// Save each cycle's accepted observations and prune old ones
async fn persist_observations(
    mut store: ObservationStore,
    mut reports: tokio::sync::mpsc::UnboundedReceiver<Arc<CycleReport>>,
    keep: chrono::Duration,
) {
    while let Some(report) = reports.recv().await {
        for (asset, observation) in &report.accepted {
            if let Err(e) = store.save_observations(asset, std::slice::from_ref(observation)).await {
                tracing::warn!("  ✗ Failed to save {} to Redis: {}", asset, e);
            }
        }

        if report.cycle % CLEANUP_EVERY_CYCLES == 0 {
            tracing::info!("🧹 Running Redis cleanup...");
            for asset in report.indicators.keys() {
                match store.cleanup_old(asset, keep).await {
                    Ok(removed) if removed > 0 => {
                        tracing::info!("  ✓ Cleaned up {} old observations for {}", removed, asset)
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("  ✗ Failed to cleanup {}: {}", asset, e),
                }
            }
        }
    }
}

// ============================================================================
// Terminal Output
// ============================================================================

/// Colours for one theme
#[derive(Debug, Clone, Copy, PartialEq)]
struct Palette {
    header: Color,
    up: Color,
    down: Color,
    warn: Color,
}

impl Palette {
    fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self {
                header: Color::Cyan,
                up: Color::Green,
                down: Color::Red,
                warn: Color::Yellow,
            },
            Theme::Light => Self {
                header: Color::DarkBlue,
                up: Color::DarkGreen,
                down: Color::DarkRed,
                warn: Color::DarkYellow,
            },
        }
    }

    fn header<D: Display>(&self, text: D) -> StyledContent<D> {
        style(text).with(self.header).bold()
    }

    fn warn<D: Display>(&self, text: D) -> StyledContent<D> {
        style(text).with(self.warn)
    }

    fn error<D: Display>(&self, text: D) -> StyledContent<D> {
        style(text).with(self.down)
    }

    /// Green for gains, red for losses
    fn signed<D: Display>(&self, value: f64, text: D) -> StyledContent<D> {
        let colour = if value >= 0.0 { self.up } else { self.down };
        style(text).with(colour)
    }
}

struct TerminalPresenter {
    palette: Palette,
}

impl TerminalPresenter {
    fn new(theme: Theme) -> Self {
        Self {
            palette: Palette::for_theme(theme),
        }
    }

    fn indicator_row(&self, s: &IndicatorSnapshot) -> String {
        let p = &self.palette;
        let change = match s.change_pct {
            Reading::Ready { value } => p.signed(value, format!("{:>+8.2}%", value)).to_string(),
            Reading::InsufficientData { .. } => format!("{:>9}", "N/A"),
        };
        let macd = s
            .macd
            .value()
            .map(|m| p.signed(m.histogram, format!("{:>10.4}", m.histogram)).to_string())
            .unwrap_or_else(|| format!("{:>10}", "N/A"));
        let bands = s
            .bollinger
            .value()
            .map(|b| format!("{:.2}-{:.2}", b.lower, b.upper))
            .unwrap_or_else(|| "N/A".to_string());
        let mas: Vec<String> = s
            .moving_averages
            .iter()
            .map(|(period, reading)| format!("MA{}={}", period, reading))
            .collect();
        let stale = if s.stale {
            format!(" {}", p.warn("[stale]"))
        } else {
            String::new()
        };

        format!(
            "{:<10} {:>14.4} {} {:>7} {} {:<24} {}{}",
            s.asset,
            s.price,
            change,
            s.rsi.to_string(),
            macd,
            bands,
            mas.join(" "),
            stale
        )
    }
}

impl Presenter for TerminalPresenter {
    fn publish(&self, report: &CycleReport) {
        let p = &self.palette;
        let mut out = String::new();

        out.push_str(&format!(
            "\n{}\n",
            p.header(format!(
                "=== Cycle {} @ {} ===",
                report.cycle,
                report.completed_at.format("%Y-%m-%d %H:%M:%S UTC")
            ))
        ));
        out.push_str(&format!(
            "{:<10} {:>14} {:>9} {:>7} {:>10} {:<24} {}\n",
            "Asset", "Price", "Change", "RSI", "MACD hist", "Bollinger", "Moving averages"
        ));
        out.push_str(&format!("{}\n", "-".repeat(100)));
        for snapshot in report.indicators.values() {
            out.push_str(&self.indicator_row(snapshot));
            out.push('\n');
        }

        let portfolio = &report.portfolio;
        if !portfolio.is_empty() {
            out.push_str(&format!(
                "\n{}  value ${:.2}  cost ${:.2}  P&L {}\n",
                p.header("Portfolio"),
                portfolio.total_value,
                portfolio.total_cost,
                p.signed(portfolio.unrealized_pnl, format!("${:.2}", portfolio.unrealized_pnl))
            ));
            for asset in &portfolio.assets {
                out.push_str(&format!(
                    "  {:<10} {:>12.4} @ {:>12.4} = ${:>14.2}  {:>6.2}%  P&L {}\n",
                    asset.asset,
                    asset.quantity,
                    asset.price,
                    asset.value,
                    asset.allocation_pct,
                    p.signed(asset.unrealized_pnl, format!("${:.2}", asset.unrealized_pnl))
                ));
            }
            if !portfolio.unpriced.is_empty() {
                out.push_str(&format!(
                    "  {}\n",
                    p.warn(format!("No price for: {}", portfolio.unpriced.join(", ")))
                ));
            }
        }

        for event in &report.alerts {
            out.push_str(&format!("{} {}\n", p.warn("🚨 ALERT"), event));
        }

        for (asset, error) in &report.failures {
            out.push_str(&format!("{}: {}\n", p.error(format!("✗ {}", asset)), error));
        }

        println!("{}", out);
    }
}

// ============================================================================
// One-shot Commands
// ============================================================================

async fn show_top_coins(settings: &Settings, limit: usize, export: Option<&std::path::Path>) -> Result<()> {
    let client = CoinGeckoClient::new(&settings.source)?;
    let coins = client.top_coins(limit).await?;

    println!("\n{}", "=".repeat(40));
    println!("TOP {} CRYPTOCURRENCIES BY MARKET CAP", limit);
    println!("{}", "=".repeat(40));
    println!(
        "\n{:<4} {:<8} {:<20} {:>14} {:>20} {:>9}",
        "Rank", "Symbol", "Name", "Price (USD)", "Market Cap", "24h %"
    );
    println!("{}", "-".repeat(80));

    for (i, coin) in coins.iter().enumerate() {
        let change = coin
            .price_change_percentage_24h
            .map(|c| format!("{:.2}%", c))
            .unwrap_or_else(|| "N/A".to_string());

        println!(
            "{:<4} {:<8} {:<20} {:>14.2} {:>20.0} {:>9}",
            i + 1,
            coin.symbol.to_uppercase(),
            coin.name,
            coin.current_price.unwrap_or(0.0),
            coin.market_cap.unwrap_or(0.0),
            change
        );
    }

    let now = chrono::Utc::now();
    println!("\nLast updated: {}", now.format("%Y-%m-%d %H:%M:%S UTC"));

    if let Some(dir) = export {
        let path = export_top_coins(dir, limit, &coins, now)?;
        println!("Data exported to {}", path.display());
    }

    Ok(())
}

async fn analyze_coin(settings: &Settings, coin: &str, days: u32) -> Result<()> {
    let client = CoinGeckoClient::new(&settings.source)?;
    if let Err(e) = client.load_coin_list().await {
        tracing::warn!("Failed to load coin list ({:#}), using built-in symbols only", e);
    }

    let coin_id = client.resolve_coin_id(coin).await;
    let observations = client
        .market_chart(&coin_id, days)
        .await
        .with_context(|| format!("No history for {}", coin_id))?
        .observations();

    let capacity = observations.len().max(1);
    let mut cache = TimeSeriesCache::new(capacity)?;
    cache.extend(&coin_id, observations);

    let series = cache
        .series(&coin_id)
        .filter(|s| !s.is_empty())
        .with_context(|| format!("CoinGecko returned no prices for {}", coin_id))?;

    let mut indicators = IndicatorEngine::new(&settings.indicators)?;
    let snapshot = indicators
        .recompute(&coin_id, series)
        .with_context(|| format!("No indicators for {}", coin_id))?;

    let high = series.iter().map(|o| o.price).fold(f64::MIN, f64::max);
    let low = series.iter().map(|o| o.price).fold(f64::MAX, f64::min);

    println!("\n{}", "=".repeat(40));
    println!("ANALYSIS: {} ({} days, {} points)", coin_id.to_uppercase(), days, snapshot.observations);
    println!("{}", "=".repeat(40));
    println!("Current price:   ${:.4}", snapshot.price);
    println!("24h volume:      ${:.0}", snapshot.volume);
    println!("Period high:     ${:.4}", high);
    println!("Period low:      ${:.4}", low);
    println!(
        "{:<17}{}%",
        format!("Change ({}h):", settings.indicators.change_lookback_hours),
        snapshot.change_pct
    );
    println!("{:<17}{}", format!("RSI({}):", settings.indicators.rsi_period), snapshot.rsi);
    for (period, reading) in &snapshot.moving_averages {
        println!("{:<17}{}", format!("MA({}):", period), reading);
    }
    match snapshot.macd.value() {
        Some(m) => println!(
            "MACD:            line {:.4}  signal {:.4}  histogram {:.4}",
            m.line, m.signal, m.histogram
        ),
        None => println!("MACD:            N/A"),
    }
    match snapshot.bollinger.value() {
        Some(b) => println!(
            "Bollinger:       {:.4} / {:.4} / {:.4}",
            b.lower, b.middle, b.upper
        ),
        None => println!("Bollinger:       N/A"),
    }

    Ok(())
}
