//! CellDB CLI
//!
//! Command-line tools for CellDB snapshot streams.
//!
//! # Commands
//!
//! - `demo` - Write a sample design history as a snapshot stream
//! - `inspect` - Replay a stream and summarize the final snapshot
//! - `verify` - Replay a stream and check every snapshot
//! - `dump` - List the diffs of a stream

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CellDB command-line stream tools.
#[derive(Parser)]
#[command(name = "celldb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the snapshot stream file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample design history as a snapshot stream
    Demo {
        /// Number of edit rounds after the initial design
        #[arg(short, long, default_value = "3")]
        rounds: usize,
    },

    /// Replay a stream and summarize the final snapshot
    Inspect {
        /// Show per-cell details
        #[arg(short, long)]
        cells: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay a stream and check every snapshot
    Verify,

    /// List the diffs of a stream
    Dump {
        /// Maximum number of diffs to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Demo { rounds } => {
            let path = cli.path.ok_or("Stream path required for demo")?;
            commands::demo::run(&path, rounds)?;
        }
        Commands::Inspect { cells, format } => {
            let path = cli.path.ok_or("Stream path required for inspect")?;
            commands::inspect::run(&path, cells, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Stream path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Dump { limit, format } => {
            let path = cli.path.ok_or("Stream path required for dump")?;
            commands::dump::run(&path, limit, &format)?;
        }
        Commands::Version => {
            println!("CellDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("CellDB Core v{}", celldb_core::VERSION);
        }
    }

    Ok(())
}
