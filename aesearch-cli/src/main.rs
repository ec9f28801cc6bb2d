//! aesearch CLI: plan, run and rank stages of the autoencoder architecture search.

mod commands;

use aesearch_core::SearchStage;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Staged architecture search for convolutional autoencoders
#[derive(Parser, Debug)]
#[command(name = "aesearch", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

/// Overrides shared by the stage subcommands.
#[derive(clap::Args, Debug, Default)]
struct StageArgs {
    /// Stage to plan or run: test, initial, top_n, latent_search
    #[arg(short, long)]
    search_type: Option<SearchStage>,

    /// Bottleneck width
    #[arg(short = 'n', long)]
    n_ae_latents: Option<usize>,

    /// Experiment name (defaults to the stage's name)
    #[arg(short, long)]
    experiment_name: Option<String>,

    /// Root directory for experiment ledgers
    #[arg(long)]
    save_dir: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Write the resolved configuration to the workspace config file
    Init {
        /// Replace an existing workspace config
        #[arg(long)]
        force: bool,
    },
    /// Print the launch requests a stage would make, as JSON
    Plan {
        #[command(flatten)]
        stage: StageArgs,
    },
    /// Plan a stage and launch every request
    Run {
        #[command(flatten)]
        stage: StageArgs,

        /// Synthetic batch size used to score each model
        #[arg(long, default_value_t = 4)]
        batch_size: usize,
    },
    /// Rank the completed versions of one experiment directory
    Rank {
        /// Experiment directory holding version_* subdirectories
        dir: PathBuf,

        /// Number of versions to report
        #[arg(short, default_value_t = 1)]
        k: usize,
    },
    /// Describe an architecture list file and check each entry builds
    Inspect {
        /// JSON file of architecture descriptors
        arch_file: PathBuf,

        /// Only inspect this entry
        #[arg(long)]
        index: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

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

    // Structured JSON log alongside the human-readable stream.
    let log_dir = directories::ProjectDirs::from("dev", "aesearch", "aesearch")
        .map(|d| d.data_dir().join("logs"));
    let mut _guard = None;
    let json_layer = match log_dir {
        Some(dir) if std::fs::create_dir_all(&dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(&dir, "aesearch.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            _guard = Some(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_filter(EnvFilter::new("debug")),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = std::fs::canonicalize(&cli.workspace).unwrap_or(cli.workspace.clone());

    commands::handle_command(cli.command, &workspace, cli.config.as_deref())
}
