// crates/server/src/main.rs
//! Loanminer server binary.
//!
//! Binds the HTTP listener, wires the job supervisor, and spawns the
//! background sweeper that evicts finished jobs after their TTL.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use loanminer_jobs::{JobSupervisor, MinerCommand};
use loanminer_server::{create_app, AppState};

#[derive(Debug, Parser)]
#[command(name = "loanminer", version, about = "Loan approval mining server")]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "LOANMINER_PORT", default_value_t = 8000)]
    port: u16,

    /// Path to the mining binary.
    #[arg(long, env = "LOANMINER_BIN", default_value = "target/release/mining")]
    mining_bin: PathBuf,

    /// Data file passed to the mining binary as its single argument.
    #[arg(long, env = "LOANMINER_DATA", default_value = "application_data.csv")]
    data_file: String,

    /// How long a finished job stays pollable before eviction, in seconds.
    #[arg(long, env = "LOANMINER_JOB_TTL", default_value_t = 900)]
    job_ttl_secs: u64,

    /// How often the eviction sweeper runs, in seconds.
    #[arg(long, default_value_t = 60)]
    sweep_interval_secs: u64,
}

/// Get the static directory for serving frontend files.
///
/// Priority:
/// 1. STATIC_DIR environment variable (explicit override)
/// 2. ./dist directory (if it exists)
/// 3. None (API-only mode)
fn get_static_dir() -> Option<PathBuf> {
    std::env::var("STATIC_DIR")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            let dist = PathBuf::from("dist");
            dist.exists().then_some(dist)
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    eprintln!("\n\u{26cf} loanminer v{}\n", env!("CARGO_PKG_VERSION"));

    let supervisor = Arc::new(JobSupervisor::new(MinerCommand::new(
        &cli.mining_bin,
        &cli.data_file,
    )));

    // Finished jobs linger for the TTL so clients can drain late, then the
    // sweeper drops them (the registry would otherwise grow forever).
    let _sweeper = supervisor.spawn_sweeper(
        Duration::from_secs(cli.job_ttl_secs),
        Duration::from_secs(cli.sweep_interval_secs),
    );

    let state = AppState::new(supervisor);
    let static_dir = get_static_dir();
    if let Some(dir) = &static_dir {
        tracing::info!(dir = %dir.display(), "serving static frontend");
    }
    let app = create_app(state, static_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        port = cli.port,
        mining_bin = %cli.mining_bin.display(),
        data_file = %cli.data_file,
        "server listening"
    );
    eprintln!("  \u{2192} http://localhost:{}\n", cli.port);

    axum::serve(listener, app).await?;

    Ok(())
}
