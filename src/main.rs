//! ccrun - single-shot agent invocation
//!
//! The entry point marker rewrites target: runs one composed prompt
//! through the agent and prints the streamed response.
//!
//! ```bash
//! ccrun "<prompt>" [--taskId <id>]
//! ccrun -f <file> ["user input"] [--taskId <id>]
//! ```
//!
//! SIGINT/SIGTERM abort the in-flight agent call cooperatively; the
//! process exits after the cleanup completes.

use ccrun::agent::{cancel_pair, run_agent, AgentRunOptions, HttpAgentInvoker, HttpAgentInvokerConfig};
use ccrun::observability::init_default_logging;
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// Single-shot agent runner.
#[derive(Parser)]
#[command(name = "ccrun")]
#[command(about = "Run one prompt through the agent")]
#[command(version)]
struct Cli {
    /// Inline prompt, or user input when -f is given.
    text: Option<String>,

    /// Read the prompt from a file instead.
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    file: Option<PathBuf>,

    /// Task id to attribute the run to.
    #[arg(long = "taskId", value_name = "ID")]
    task_id: Option<i64>,

    /// Agent service endpoint.
    #[arg(long, env = "CCRUN_AGENT_URL", default_value = "http://localhost:8790")]
    agent_url: String,

    /// Agent call timeout in seconds.
    #[arg(long, env = "CCRUN_AGENT_TIMEOUT", default_value_t = 600)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let (prompt, user_input) = match (&cli.file, cli.text) {
        (Some(_), input) => (None, input),
        (None, Some(prompt)) => (Some(prompt), None),
        (None, None) => {
            eprintln!("Usage: ccrun \"<prompt>\" [--taskId <id>]");
            eprintln!("   or: ccrun -f <file> [\"user input\"] [--taskId <id>]");
            process::exit(1);
        }
    };

    let invoker = match HttpAgentInvoker::new(HttpAgentInvokerConfig {
        base_url: cli.agent_url.clone(),
        timeout: Duration::from_secs(cli.timeout_secs),
    }) {
        Ok(invoker) => invoker,
        Err(e) => {
            error!("Failed to build agent client: {}", e);
            process::exit(1);
        }
    };

    // Interrupts propagate a cooperative cancellation into the in-flight
    // agent call rather than killing the process outright.
    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("Interrupt received, aborting agent call...");
        handle.cancel();
    });

    let options = AgentRunOptions {
        prompt,
        file_path: cli.file,
        user_input,
        task_id: cli.task_id,
        base_dir: std::env::current_dir().ok(),
    };

    match run_agent(&invoker, options, cancel).await {
        Ok(Some(response)) => println!("{response}"),
        Ok(None) => info!("Agent produced no text output"),
        Err(e) => {
            error!("Agent run failed: {}", e);
            process::exit(1);
        }
    }
}
