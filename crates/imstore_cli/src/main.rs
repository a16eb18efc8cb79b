//! imstore CLI
//!
//! Server binary and maintenance tools for imstore storage roots.
//!
//! # Commands
//!
//! - `serve` - Run the storage server (RPC plus replication)
//! - `inspect` - Display block and index statistics
//! - `verify` - Check block headers and record framing
//! - `dump-log` - Print log records for debugging

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::commands::serve::ServeArgs;

/// imstore storage server and tools.
#[derive(Parser)]
#[command(name = "imstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the storage root
    #[arg(global = true, short, long)]
    root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the storage server
    Serve(ServeArgs),

    /// Display block and index statistics
    Inspect {
        /// Show per-block details
        #[arg(short, long)]
        blocks: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify block headers and record framing
    Verify,

    /// Dump log records for debugging
    DumpLog {
        /// Start from this record id
        #[arg(long, default_value = "0")]
        from: i64,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Block size the storage was created with
        #[arg(long, default_value_t = imstore_core::DEFAULT_BLOCK_SIZE)]
        block_size: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over the default level.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve(args) => {
            commands::serve::run(cli.root, &args)?;
        }
        Commands::Inspect { blocks, format } => {
            let root = cli.root.ok_or("Storage root required for inspect")?;
            commands::inspect::run(&root, blocks, &format)?;
        }
        Commands::Verify => {
            let root = cli.root.ok_or("Storage root required for verify")?;
            commands::verify::run(&root)?;
        }
        Commands::DumpLog {
            from,
            limit,
            block_size,
            format,
        } => {
            let root = cli.root.ok_or("Storage root required for dump-log")?;
            commands::dump_log::run(&root, from, limit, block_size, &format)?;
        }
        Commands::Version => {
            println!("imstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("imstore Core v{}", imstore_core::VERSION);
        }
    }

    Ok(())
}
