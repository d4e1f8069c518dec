//! stroke CLI: train, inspect and query stroke-risk classifiers.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// stroke: training step for the stroke-risk classifier
#[derive(Parser, Debug)]
#[command(name = "stroke", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train, export and plot a model from a training argument bundle
    Train {
        /// Argument bundle (JSON or TOML)
        #[arg(short, long)]
        args: PathBuf,

        /// Override the batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override the diagram path
        #[arg(long)]
        model_plot_path: Option<PathBuf>,
    },
    /// Score serialized records with a saved model
    Predict {
        /// Saved model directory
        #[arg(short, long)]
        model_dir: PathBuf,

        /// JSON-lines file, one raw record per line
        #[arg(short, long)]
        records: PathBuf,

        /// Signature to call
        #[arg(short, long, default_value = "serving_default")]
        signature: String,
    },
    /// Show signatures, layers and fingerprint of a saved model
    Inspect {
        /// Saved model directory
        #[arg(short, long)]
        model_dir: PathBuf,
    },
    /// Render the architecture diagram of a saved model
    Plot {
        /// Saved model directory
        #[arg(short, long)]
        model_dir: PathBuf,

        /// PNG output path
        #[arg(short, long, default_value = "images/model_plot.png")]
        out: PathBuf,

        /// Print Graphviz DOT instead of writing a PNG
        #[arg(long)]
        dot: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default config to .stroke/config.toml
    Init,
    /// Print the effective configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "stroke", "stroke-trainer")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "stroke.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace)
}
