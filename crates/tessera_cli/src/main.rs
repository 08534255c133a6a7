//! Tessera CLI
//!
//! Command-line tools for Tessera store management.
//!
//! # Commands
//!
//! - `inspect` - Display schema, versions and object counts
//! - `verify` - Verify commit log integrity
//! - `compact` - Rewrite the commit log as a single snapshot
//! - `dump-log` - Dump commit log records for debugging
//! - `query` - Print objects matching a predicate as JSON

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tessera command-line store tools.
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
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
    /// Display schema, versions and object counts
    Inspect {
        /// Show every property of every class
        #[arg(short, long)]
        schema: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify commit log integrity
    Verify,

    /// Rewrite the commit log as a single snapshot
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Dump commit log records for debugging
    DumpLog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print objects of a class matching a predicate as JSON
    Query {
        /// Class name
        class: String,

        /// Predicate, e.g. "age > 18 SORT(name ASC)"
        predicate: Option<String>,

        /// Maximum number of objects to print
        #[arg(short, long)]
        limit: Option<usize>,
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { schema, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, schema, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::DumpLog { limit, format } => {
            let path = cli.path.ok_or("Store path required for dump-log")?;
            commands::dump_log::run(&path, limit, &format)?;
        }
        Commands::Query {
            class,
            predicate,
            limit,
        } => {
            let path = cli.path.ok_or("Store path required for query")?;
            commands::query::run(&path, &class, predicate.as_deref(), limit)?;
        }
        Commands::Version => {
            println!("Tessera CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Commit log format v{}, manifest format v{}.{}",
                tessera_core::log::LOG_VERSION,
                tessera_core::manifest::FORMAT_VERSION.0,
                tessera_core::manifest::FORMAT_VERSION.1
            );
        }
    }

    Ok(())
}
