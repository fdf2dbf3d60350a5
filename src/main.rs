//! Entry point: parse the CLI, initialize tracing, and either run the
//! gateway or dispatch to one of the inspection subcommands.

mod agent;
mod channels;
mod cli;
mod config;
mod dispatch;
mod error;
mod gateway;
mod lock;
mod scheduler;
mod session;
mod settings;

use std::sync::Arc;

use clap::Parser;

use cli::{Cli, Commands};
use gateway::Gateway;
use settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run_gateway().await,
        Commands::Cron { command } => cli::cron::run_cron_command(command).await,
        Commands::Config { command } => cli::config::run_config_command(command),
        Commands::Lock { command } => cli::lock::run_lock_command(command),
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
}

async fn run_gateway() -> anyhow::Result<()> {
    let settings = Settings::load();

    // The real LLM-backed handler is an external collaborator; this binary
    // only ships the dispatch/channel/scheduler plumbing around it. Echo
    // keeps `run` exercisable end-to-end without one.
    let agent = Arc::new(agent::EchoAgent) as Arc<dyn agent::Agent>;

    let gateway = match Gateway::start(settings, agent).await {
        Ok(gateway) => gateway,
        Err(error::GatewayError::LockHeld { pid, created_at, http_port }) => {
            eprintln!("gateway already running: pid={pid} started={created_at} http_port={http_port:?}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("failed to start gateway: {e}");
            std::process::exit(1);
        }
    };

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received");
    gateway.shutdown().await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
