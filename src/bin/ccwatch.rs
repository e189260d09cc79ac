//! ccwatch - the watcher daemon
//!
//! Loads a TOML configuration, binds the stage pipeline, starts the
//! configured trigger, and runs until SIGINT/SIGTERM. Shutdown order:
//! stop the trigger (no new events), cancel in-flight agent calls, wait
//! for dispatched runs to drain, exit.

use ccrun::agent::{cancel_pair, HttpAgentInvoker, HttpAgentInvokerConfig};
use ccrun::config::Config;
use ccrun::observability::init_default_logging;
use ccrun::pipeline::{load_pipeline, Services};
use ccrun::stage::StageRegistry;
use ccrun::task::{TaskClient, TaskClientConfig};
use ccrun::watcher::Watcher;
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Event-triggered pipeline watcher.
#[derive(Parser)]
#[command(name = "ccwatch")]
#[command(about = "Watch a trigger and run its stage pipeline")]
#[command(version)]
struct Cli {
    /// Configuration file path.
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    if let Err(e) = run(cli).await {
        error!("Failed to start: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading configuration from: {}", cli.config.display());
    let config = Config::load_from_file(&cli.config)?;

    let registry = StageRegistry::builtin();
    let stages = load_pipeline(&config.run, &registry)?;
    info!(
        trigger = %config.trigger.name,
        stages = stages.len(),
        "pipeline bound"
    );

    let tasks = TaskClient::new(TaskClientConfig {
        base_url: config.tasks.base_url.clone(),
        ..Default::default()
    })?;
    let agent = HttpAgentInvoker::new(HttpAgentInvokerConfig {
        base_url: config.agent.base_url.clone(),
        timeout: Duration::from_secs(config.agent.timeout_secs),
    })?;

    let (cancel_handle, cancel) = cancel_pair();
    let services = Services::new(Arc::new(tasks), Arc::new(agent))
        .with_cancel(cancel)
        .with_base_dir(config.base_dir.clone());

    let mut watcher = Watcher::new(config.trigger.clone(), services)
        .task_scope(config.task_scope)
        .stages(stages);
    watcher.start().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Watcher is running, waiting for events...");
    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }

    // No new events, then cancel in-flight agent calls cooperatively and
    // wait for dispatched runs to finish.
    watcher.stop().await;
    cancel_handle.cancel();
    let remaining = watcher.drain(Duration::from_secs(10)).await;
    if remaining > 0 {
        warn!(remaining, "shutdown deadline reached with runs still in flight");
    }

    info!("Watcher shutdown complete");
    Ok(())
}
