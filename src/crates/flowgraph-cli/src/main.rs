//! flowgraph - validate, lay out, run and resume flow definitions

use clap::{Args, Parser, Subcommand};
use flowgraph_cli::RunOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowgraph")]
#[command(about = "Run computation graphs step by step, with snapshots", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a flow definition and build its graph
    Validate {
        /// Path to a YAML or JSON flow definition
        file: PathBuf,
    },

    /// Print the execution layers
    Layers {
        /// Path to a YAML or JSON flow definition
        file: PathBuf,
    },

    /// Run a flow, printing one JSON event per line
    Run {
        /// Path to a YAML or JSON flow definition
        file: PathBuf,

        /// Run input (JSON, or plain text)
        #[arg(short, long)]
        input: Option<String>,

        /// Only run this vertex and its ancestors
        #[arg(long)]
        stop_at: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Continue a run from a snapshot file
    Resume {
        /// Path to the same flow definition the snapshot was taken from
        file: PathBuf,

        /// Snapshot file (.json, .yaml or .yml)
        #[arg(short, long)]
        snapshot: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Run configuration file; FLOWGRAPH_* environment variables otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session id stored in the run context
    #[arg(long)]
    session_id: Option<String>,

    /// Maximum number of steps
    #[arg(long)]
    max_steps: Option<usize>,

    /// Per-step timeout in milliseconds
    #[arg(long)]
    step_timeout_ms: Option<u64>,

    /// Stop after the first failed step
    #[arg(long)]
    fail_fast: bool,

    /// Pause after this many steps and write a snapshot
    #[arg(long, requires = "snapshot_out")]
    stop_after: Option<u64>,

    /// Snapshot file written when pausing
    #[arg(long)]
    snapshot_out: Option<PathBuf>,
}

impl RunArgs {
    fn into_options(self, input: Option<String>, stop_at: Option<String>) -> RunOptions {
        RunOptions {
            input,
            session_id: self.session_id,
            config: self.config,
            max_steps: self.max_steps,
            step_timeout_ms: self.step_timeout_ms,
            fail_fast: self.fail_fast,
            stop_at,
            stop_after: self.stop_after,
            snapshot_out: self.snapshot_out,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let outcome = match cli.command {
        Commands::Validate { file } => {
            flowgraph_cli::validate(&file, &mut out)?;
            None
        }
        Commands::Layers { file } => {
            flowgraph_cli::layers(&file, &mut out)?;
            None
        }
        Commands::Run {
            file,
            input,
            stop_at,
            run,
        } => {
            let options = run.into_options(input, stop_at);
            Some(flowgraph_cli::run(&file, &options, &mut out).await?)
        }
        Commands::Resume {
            file,
            snapshot,
            run,
        } => {
            let options = run.into_options(None, None);
            Some(flowgraph_cli::resume(&file, &snapshot, &options, &mut out).await?)
        }
    };
    out.flush()?;

    match outcome {
        Some(outcome) if !outcome.is_success() => {
            tracing::warn!("run finished with errored vertices");
            Ok(ExitCode::from(2))
        }
        _ => Ok(ExitCode::SUCCESS),
    }
}
