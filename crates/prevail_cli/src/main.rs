//! Prevail CLI
//!
//! Offline tools for Prevail journal directories. None of the commands take
//! the directory lock or modify files, so they can run next to a live
//! engine.
//!
//! # Commands
//!
//! - `inspect` - Summarize journal files and id ranges
//! - `verify` - Parse every entry and check id ordering
//! - `dump` - Print journal entries

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Prevail journal tools.
#[derive(Parser)]
#[command(name = "prevail")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the journal directory
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
    /// Summarize journal files and id ranges
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Parse every entry and check id ordering
    Verify {
        /// Treat id gaps as failures
        #[arg(short, long)]
        strict: bool,
    },

    /// Print journal entries
    Dump {
        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Skip entries with a lower id
        #[arg(long, default_value = "1")]
        from_id: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Journal path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify { strict } => {
            let path = cli.path.ok_or("Journal path required for verify")?;
            commands::verify::run(&path, strict)?;
        }
        Commands::Dump {
            limit,
            from_id,
            format,
        } => {
            let path = cli.path.ok_or("Journal path required for dump")?;
            commands::dump::run(&path, limit, from_id, &format)?;
        }
        Commands::Version => {
            println!("Prevail CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Prevail Core v{}", prevail_core::VERSION);
        }
    }

    Ok(())
}
