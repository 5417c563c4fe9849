//! The stanza CLI: run the agent, or render its pipeline as a graph.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stanza_agent::agent::LogAgentBuilder;

#[derive(Parser)]
#[command(name = "stanza")]
#[command(about = "A log collection agent")]
#[command(version)]
struct Args {
    /// Config file globs, merged in order.
    #[arg(long = "config", value_name = "GLOB", default_value = "./config.yaml")]
    config: Vec<String>,

    /// Directory of plugin templates.
    #[arg(long = "plugin_dir", value_name = "PATH", default_value = "./plugins")]
    plugin_dir: PathBuf,

    /// Path of the offset database. Omit for in-memory state only.
    #[arg(long = "database", value_name = "PATH")]
    database: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Export a dot-formatted representation of the operator graph.
    Graph,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn builder(args: &Args) -> LogAgentBuilder {
    let mut builder = LogAgentBuilder::new()
        .with_config_globs(args.config.clone())
        .with_plugin_dir(args.plugin_dir.clone());
    if let Some(database) = &args.database {
        builder = builder.with_database_path(database.clone());
    }
    builder
}

/// Builds the pipeline against in-memory state and prints it as DOT.
fn run_graph(args: &Args) -> ExitCode {
    let agent = match LogAgentBuilder::new()
        .with_config_globs(args.config.clone())
        .with_plugin_dir(args.plugin_dir.clone())
        .build()
    {
        Ok(agent) => agent,
        Err(err) => {
            error!(error = %err, "failed to build operator pipeline");
            return ExitCode::FAILURE;
        }
    };
    println!("{}", agent.pipeline().render_dot());
    ExitCode::SUCCESS
}

async fn run_agent(args: &Args) -> ExitCode {
    let agent = match builder(args).build() {
        Ok(agent) => agent,
        Err(err) => {
            error!(error = %err, "failed to build agent");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = agent.start().await {
        error!(error = %err, "failed to start agent");
        return ExitCode::FAILURE;
    }
    info!("agent started");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");

    let errors = agent.stop().await;
    if errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        // Shutdown errors were already logged; reflect them in the exit
        // status.
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    match args.command {
        Some(Command::Graph) => run_graph(&args),
        None => run_agent(&args).await,
    }
}
