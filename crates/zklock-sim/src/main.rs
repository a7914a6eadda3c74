//! zklock contention simulator binary.
//!
//! # Usage
//!
//! ```bash
//! # Default mix: 8 readers, 4 writers, 10 rounds each
//! zklock-sim
//!
//! # Writer-heavy, reproducible hold times
//! zklock-sim --readers 2 --writers 16 --rounds 50 --seed 42
//! ```

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use zklock_sim::{SimConfig, run};

/// zklock contention simulator
#[derive(Parser, Debug)]
#[command(name = "zklock-sim")]
#[command(about = "Run readers and writers against an in-memory ensemble and check exclusion")]
#[command(version)]
struct Args {
    /// Number of reader tasks
    #[arg(short, long, default_value = "8")]
    readers: usize,

    /// Number of writer tasks
    #[arg(short, long, default_value = "4")]
    writers: usize,

    /// Acquisitions per task
    #[arg(long, default_value = "10")]
    rounds: usize,

    /// Maximum hold time per acquisition in milliseconds
    #[arg(long, default_value = "5")]
    hold_ms: u64,

    /// Seed for hold-time randomness
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Lock path (created if missing)
    #[arg(long, default_value = "/zklock/sim")]
    lock_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(
        readers = args.readers,
        writers = args.writers,
        rounds = args.rounds,
        seed = args.seed,
        "zklock-sim starting on {}",
        args.lock_path
    );

    let config = SimConfig {
        readers: args.readers,
        writers: args.writers,
        rounds: args.rounds,
        hold_ms: args.hold_ms,
        seed: args.seed,
        lock_path: args.lock_path,
    };

    let report = run(config).await?;

    tracing::info!(
        reads = report.reads,
        writes = report.writes,
        max_concurrent_readers = report.max_concurrent_readers,
        watches_fired = report.watches_fired,
        elapsed = ?report.elapsed,
        "simulation finished without violations"
    );

    Ok(())
}
