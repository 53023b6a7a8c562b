use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::info;

use leadlag_detect::config::{EngineConfig, RunSettings, SourceKind, Universe};
use leadlag_detect::pipeline;
use leadlag_detect::stress;
use leadlag_detect::tui;
use leadlag_detect::web;

#[derive(Parser)]
#[command(name = "leadlag-detect", about = "Real-time lead-follow causality across a basket of assets")]
struct Cli {
    /// Run mode: tui, web, headless, or stress
    #[arg(long, default_value = "tui")]
    mode: String,

    /// Tick source: binance or synthetic
    #[arg(long, default_value = "synthetic")]
    source: String,

    /// Web server port (web mode only)
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Comma-separated asset symbols (defaults to a ten-coin basket)
    #[arg(long, value_delimiter = ',')]
    assets: Vec<String>,

    /// Chance per synthetic cycle of a leader move (0.0-1.0)
    #[arg(long, default_value = "0.05")]
    leader_rate: f64,

    /// Where to write periodic state snapshots
    #[arg(long)]
    snapshot_path: Option<PathBuf>,

    /// Seconds between snapshots
    #[arg(long, default_value = "60")]
    snapshot_interval: u64,

    /// Load the snapshot at --snapshot-path before starting
    #[arg(long)]
    restore: bool,

    /// Dashboard batch cadence in milliseconds
    #[arg(long, default_value = "500")]
    batch_interval_ms: u64,

    /// Write the causality matrix CSV here when a headless run ends
    #[arg(long)]
    csv_out: Option<PathBuf>,

    /// Run duration in seconds (0 = until Ctrl-C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Seconds per stress level (stress mode only)
    #[arg(long, default_value = "5")]
    level_duration: u64,
}

impl Cli {
    fn settings(&self) -> Result<RunSettings, Box<dyn std::error::Error>> {
        let universe = if self.assets.is_empty() {
            Universe::default()
        } else {
            Universe::new(self.assets.iter().map(|a| a.to_uppercase()))?
        };
        let source = match self.source.as_str() {
            "binance" => SourceKind::Binance,
            "synthetic" => SourceKind::Synthetic,
            other => return Err(format!("unknown source: {other}. Use --source binance|synthetic").into()),
        };
        Ok(RunSettings {
            universe,
            engine: EngineConfig::default(),
            source,
            leader_rate: self.leader_rate.clamp(0.0, 1.0),
            snapshot_path: self.snapshot_path.clone(),
            snapshot_interval: Duration::from_secs(self.snapshot_interval.max(1)),
            restore: self.restore,
            ..RunSettings::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    if cli.mode != "tui" {
        init_logging();
    }
    let settings = cli.settings()?;
    let batch_interval = Duration::from_millis(cli.batch_interval_ms.max(1));

    match cli.mode.as_str() {
        "tui" => tui::run(settings, cli.duration).await?,
        "web" => web::run(cli.port, settings, batch_interval, cli.duration).await?,
        "headless" => run_headless(settings, cli.duration, cli.csv_out).await?,
        "stress" => stress::run(settings.universe, cli.level_duration).await?,
        other => eprintln!("Unknown mode: {other}. Use --mode tui|web|headless|stress"),
    }

    Ok(())
}

async fn run_headless(
    settings: RunSettings,
    duration_secs: u64,
    csv_out: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== leadlag-detect (headless) ===");
    println!(
        "Assets: {}, Duration: {}s",
        settings.universe.len(),
        if duration_secs == 0 { "infinite".to_string() } else { duration_secs.to_string() }
    );
    println!();

    let pipeline = pipeline::setup(&settings).await?;
    let run_duration = if duration_secs == 0 { Duration::from_secs(u64::MAX / 4) } else { Duration::from_secs(duration_secs) };
    let start = Instant::now();
    let mut report = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = report.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
        if start.elapsed() >= run_duration {
            break;
        }
        let health = pipeline.engine.lock().health();
        println!(
            "  {:>5}s | ticks={} live_leaders={} divergences={} feed={:?} p99={}us",
            health.uptime_secs,
            health.total_ticks,
            health.live_leader_events,
            health.divergence_events,
            pipeline.feed_status(),
            health.tick_latency.p99_us
        );
    }

    let engine = pipeline.engine.clone();
    pipeline.shutdown().await;

    let (stats, view, config, latency) = {
        let e = engine.lock();
        (e.statistics(), e.matrix_view(), e.config().clone(), e.latency())
    };

    println!();
    println!("=== Results ===");
    println!("  Ticks processed:    {}", stats.total_ticks);
    println!("  Leader events:      {}", stats.leader_events_detected);
    println!("  Divergence events:  {}", stats.divergence_events);
    println!();
    println!("  Tick latency (microseconds):");
    println!("    p50={} p95={} p99={} min={} max={}", latency.p50_us, latency.p95_us, latency.p99_us, latency.min_us, latency.max_us);
    println!();
    println!("  Best pairs (min {} samples):", config.default_min_samples);
    for pair in view.best_pairs_with(&config, None) {
        println!(
            "    {:<10} -> {:<10} rate={:.3} lag={:.0}ms mag={:.3} n={}",
            pair.leader, pair.follower, pair.follow_rate, pair.avg_lag, pair.avg_magnitude, pair.sample_size
        );
    }

    if let Some(path) = csv_out {
        tokio::fs::write(&path, view.to_csv()).await?;
        info!("matrix written to {}", path.display());
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
