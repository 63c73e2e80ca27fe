//! dirsync CLI
//!
//! Command-line front end for the dirsync replication engine.
//!
//! # Commands
//!
//! - `run` - Start a replication run from a JSON configuration file
//! - `checkpoint` - Inspect or reset a durable checkpoint file
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// dirsync directory replication tools.
#[derive(Parser)]
#[command(name = "dirsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a replication run from a configuration file
    Run {
        /// Path to the JSON run configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Output format for the final report (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Inspect or reset a durable checkpoint file
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Show the recorded change number
    Show {
        /// Path of the checkpoint file
        #[arg(short, long)]
        path: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Clear the checkpoint, or rewrite it with --to
    Reset {
        /// Path of the checkpoint file
        #[arg(short, long)]
        path: PathBuf,

        /// Change number to record instead of clearing
        #[arg(short, long)]
        to: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Run { config, format } => commands::run::run(&config, &format),
        Commands::Checkpoint { action } => match action {
            CheckpointAction::Show { path, format } => commands::checkpoint::show(&path, &format),
            CheckpointAction::Reset { path, to } => commands::checkpoint::reset(&path, to),
        },
        Commands::Version => {
            println!("dirsync v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("dirsync: {err}");
            ExitCode::FAILURE
        }
    }
}
