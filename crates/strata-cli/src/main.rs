use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod demo;

/// Initialize the tracing subscriber based on the --trace flag.
/// Without the flag no subscriber is registered (zero overhead).
fn initialize_tracing(level: &Option<String>) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match level {
        Some(lvl) => EnvFilter::try_new(format!("strata={lvl}"))
            .unwrap_or_else(|_| EnvFilter::new("strata=info")),
        None => return,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "strata - configuration-driven workflow orchestrator", long_about = None)]
struct Cli {
    /// Enable tracing (levels: trace, debug, info, warn, error)
    #[arg(long, global = true)]
    trace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline
    Run {
        /// Pipeline config file (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// Comma-separated step names to include
        #[arg(long)]
        only: Option<String>,
        /// Comma-separated step names to exclude
        #[arg(long)]
        exclude: Option<String>,
        /// Resume from failure snapshots
        #[arg(long)]
        resume: bool,
        /// Bypass all cache checks
        #[arg(long)]
        force: bool,
    },
    /// Export the dependency graph
    Graph {
        #[arg(short, long)]
        config: PathBuf,
        /// Output format
        #[arg(long, default_value = "text", value_parser = ["mermaid", "graphviz", "text"])]
        format: String,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the layer plan summary
        #[arg(long)]
        summary: bool,
    },
    /// Print registry and component counts
    Status,
    /// List registered methods per component
    Engines,
    /// Print last-run metrics
    Metrics {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long, default_value = "text", value_parser = ["text", "json", "markdown"])]
        format: String,
    },
    /// Cache inspection and management
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show computed vs stored signatures per step
    Plan {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run the pipeline to populate the cache
    Warm {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Drop stored signatures
    Clear {
        /// Comma-separated step names; clears everything when omitted
        #[arg(long)]
        steps: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    initialize_tracing(&cli.trace);
    demo::install();

    let code = match cli.command {
        Commands::Run {
            config,
            only,
            exclude,
            resume,
            force,
        } => commands::run::execute(&config, only, exclude, resume, force).await,
        Commands::Graph {
            config,
            format,
            output,
            summary,
        } => commands::graph::execute(&config, &format, output.as_deref(), summary),
        Commands::Status => commands::status::execute(),
        Commands::Engines => commands::engines::execute(),
        Commands::Metrics { config, format } => commands::metrics::execute(&config, &format),
        Commands::Cache { action } => match action {
            CacheAction::Plan { config } => commands::cache::plan(&config),
            CacheAction::Warm { config } => commands::cache::warm(&config).await,
            CacheAction::Clear { steps } => commands::cache::clear(steps),
        },
    };
    ExitCode::from(code)
}
