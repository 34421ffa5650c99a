//! netblock-enrich CLI.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use netblock_enrich::config::Mode;
use netblock_enrich::summary::DEFAULT_TOP_N;
use netblock_enrich::{aggregate, summarize, Config, Engine};
use serde_json::json;
use std::io::Read;
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "netblock-enrich")]
#[command(about = "Enrich IP addresses and hostnames with organization, country and anonymity data")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File with one target per line (stdin if omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Throughput preset
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Concurrent lookups (overrides the mode)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Delay before each lookup in milliseconds (overrides the mode)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Collapse IPv4 results into organization/country ranges
    #[arg(short, long)]
    aggregate: bool,

    /// Classify only, no provider calls
    #[arg(long)]
    offline: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Stable,
    Fast,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Stable => Mode::Stable,
            ModeArg::Fast => Mode::Fast,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Logs go to stderr; stdout carries the JSON result
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match args.config {
        Some(ref path) => {
            info!(config = %path.display(), "Loading configuration");
            Config::load(path)?
        }
        None => Config::default(),
    };

    if let Some(mode) = args.mode {
        config.batch.mode = mode.into();
    }
    if args.workers.is_some() {
        config.batch.max_workers = args.workers;
    }
    if args.delay_ms.is_some() {
        config.batch.inter_request_delay_ms = args.delay_ms;
    }
    if args.offline {
        config.batch.offline = true;
    }
    config.validate()?;

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let lines = read_input(args.input.as_ref())?;
    let engine = Engine::new(&config).await?;
    let mut ctx = engine.new_context();

    let cancel = ctx.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling batch");
            cancel.cancel();
        }
    });

    let mut progress = ctx.subscribe_progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            info!(
                processed = snapshot.processed,
                total = snapshot.total,
                in_flight = snapshot.in_flight,
                deferred = snapshot.deferred,
                cache_size = snapshot.cache_size,
                eta_secs = snapshot.estimated_remaining.map(|d| d.as_secs()),
                "Progress"
            );
        }
    });

    let (_, report) = engine.enrich(&mut ctx, lines.lines()).await;
    reporter.abort();

    if report.cancelled {
        warn!(
            unresolved = report.unresolved.len(),
            deferred = report.deferred.len(),
            "Batch cancelled"
        );
    }

    let now = Instant::now();
    let deferred: Vec<_> = report
        .deferred
        .iter()
        .map(|entry| {
            json!({
                "target": entry.target,
                "status": entry.status(now),
            })
        })
        .collect();

    let results = if args.aggregate {
        serde_json::to_value(aggregate(&report.records))?
    } else {
        serde_json::to_value(&report.records)?
    };

    let output = json!({
        "results": results,
        "summary": summarize(&report.records, DEFAULT_TOP_N),
        "unresolved": report.unresolved,
        "deferred": deferred,
        "cancelled": report.cancelled,
        "elapsed_ms": report.elapsed.as_millis() as u64,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn read_input(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read targets from stdin")?;
            Ok(buf)
        }
    }
}
