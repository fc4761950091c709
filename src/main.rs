//! Basis Hedger - Main Entry Point
//!
//! Runs the spread monitor against Binance futures and spot until Ctrl-C.
//! Orders are only logged unless `--live` is given or `engine.dry_run` is
//! disabled in the configuration.

use anyhow::{Context, Result};
use basis_hedger::config::Config;
use basis_hedger::lifecycle::{BinanceMarketFactory, LifecycleController, Status};
use basis_hedger::persistence::PersistenceManager;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Basis Hedger CLI
#[derive(Parser)]
#[command(name = "basis-hedger")]
#[command(version, about = "Futures/spot spread arbitrage on Binance")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor spreads and hedge (default)
    Run {
        /// Config file (default: ./config.{toml,json,yaml} if present)
        #[arg(short, long)]
        config: Option<String>,

        /// JSON analyzer document overriding the `analyzer` section
        #[arg(short, long)]
        analyzer: Option<String>,

        /// Send orders instead of logging them
        #[arg(long)]
        live: bool,
    },

    /// Show recorded orders and trades
    Status {
        /// Path to SQLite database
        #[arg(short, long, default_value = "data/basis_hedger.db")]
        db: String,

        /// Number of recent trades to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Status { db, limit }) => show_status(&db, limit),
        Some(Commands::Run {
            config,
            analyzer,
            live,
        }) => run(config.as_deref(), analyzer.as_deref(), live).await,
        None => run(None, None, false).await,
    }
}

async fn run(config_path: Option<&str>, analyzer_path: Option<&str>, live: bool) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║              Basis Hedger v{}                           ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let mut config = Config::load(config_path)?;
    if live {
        config.engine.dry_run = false;
    }
    config.validate()?;

    if config.engine.dry_run {
        info!("📝 DRY RUN - orders are logged, not sent");
    } else {
        warn!("⚠️  LIVE TRADING MODE - Real money at risk!");
    }
    log_config(&config);

    let document = match analyzer_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read analyzer document {}", path))?,
        None => serde_json::to_string(&config.analyzer)
            .context("Failed to encode analyzer configuration")?,
    };

    let api_key = credential(&config.binance.api_key, "BINANCE_API_KEY");
    let secret_key = credential(&config.binance.secret_key, "BINANCE_SECRET_KEY");
    if api_key.is_empty() && !config.engine.dry_run {
        warn!("⚠️  No API keys provided; orders will be rejected");
    }

    let controller = LifecycleController::new(config, Arc::new(BinanceMarketFactory));
    controller.start(&api_key, &secret_key, &document).await?;

    info!("🚀 Hedger running, press Ctrl-C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
        _ = wait_for_error(&controller) => {
            error!("❌ Run entered error state, manual intervention required");
        }
    }

    let failed = controller.status() == Status::Error;
    controller.stop().await;

    if failed {
        anyhow::bail!("hedger stopped in error state");
    }
    Ok(())
}

/// Value from config, falling back to an environment variable.
fn credential(configured: &str, env: &str) -> String {
    if configured.is_empty() {
        std::env::var(env).unwrap_or_default()
    } else {
        configured.to_string()
    }
}

async fn wait_for_error(controller: &LifecycleController) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if controller.status() == Status::Error {
            return;
        }
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // File appender for detailed logs
    let file_appender = tracing_appender::rolling::hourly("logs", "basis-hedger.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("basis_hedger=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let analyzer = &config.analyzer;
    info!("📋 Configuration:");
    info!("   Quote: {}", analyzer.quote);
    info!("   Slippage Limit: {}", analyzer.limit_open);
    info!("   Stop-Loss Band: {}", analyzer.limit_close);
    for (asset, area) in &analyzer.areas {
        info!(
            "   {}: open > {}% close < {}% position {} spot {} {}",
            asset, area.open, area.close, area.position, area.spot_notional, analyzer.quote
        );
    }
    info!("   Poll Interval: {}s", config.engine.poll_interval_secs);
    info!("   Leg Timeout: {}s", config.engine.leg_timeout_secs);
    info!(
        "   Retry: {} attempt(s), {}ms backoff",
        config.engine.retry.max_attempts, config.engine.retry.backoff_ms
    );
    match &config.telemetry.url {
        Some(url) => info!("   Telemetry: {} (topic {})", url, config.telemetry.topic),
        None => info!("   Telemetry: disabled"),
    }
    info!("   Database: {}", config.persistence.db_path);
}

/// Print recorded activity from the database.
fn show_status(db_path: &str, limit: usize) -> Result<()> {
    use std::path::Path;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              BASIS HEDGER STATUS                           ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The hedger has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    println!("\n📈 Activity");
    println!("   ├─ Orders Sent:      {}", persistence.order_count()?);
    println!("   ├─ Orders Failed:    {}", persistence.failed_order_count()?);
    println!("   └─ Trades:           {}", persistence.trade_count()?);

    let trades = persistence.recent_trades(limit)?;
    if trades.is_empty() {
        println!("\n   No trades recorded yet.");
        return Ok(());
    }

    println!("\n🧾 Recent Trades");
    for trade in &trades {
        println!(
            "   {}  {}  {:<6} {:<10} {:<12} {} @ {}",
            trade.timestamp.format("%Y-%m-%d %H:%M:%S"),
            trade.batch,
            trade.market,
            trade.pair,
            trade.trade_type,
            trade.quantity,
            trade.price
        );
    }

    Ok(())
}
