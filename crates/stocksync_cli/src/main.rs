//! stocksync CLI
//!
//! Maintenance tools for a stocksync data directory.
//!
//! # Commands
//!
//! - `inspect` - Show domains, schemas, record counts and queue lengths
//! - `queue` - List, remove or clear pending mutations
//! - `records` - Dump the records of a domain
//!
//! The directory is locked while a command runs, so the engine using it must
//! be stopped first.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// stocksync data directory tools.
#[derive(Parser)]
#[command(name = "stocksync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human readable text
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show domains, schemas, record counts and queue lengths
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Manage the outbound mutation queues
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Dump the records of a domain
    Records {
        /// Domain name
        domain: String,

        /// Only records whose indexed attribute matches
        #[arg(short, long, requires = "value")]
        index: Option<String>,

        /// Value to match, as JSON (bare words are taken as strings)
        #[arg(long, requires = "index")]
        value: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum QueueAction {
    /// List pending mutations, oldest first
    List {
        /// Domain name
        domain: String,

        /// Maximum number of mutations to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Remove one mutation, e.g. a record the remote keeps rejecting
    Remove {
        /// Domain name
        domain: String,

        /// Mutation id as shown by `queue list`
        id: String,
    },

    /// Remove every pending mutation of a domain
    Clear {
        /// Domain name
        domain: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Data directory required for inspect")?;
            commands::inspect::run(&path, format)?;
        }
        Commands::Queue { action } => {
            let path = cli.path.ok_or("Data directory required for queue")?;
            match action {
                QueueAction::List {
                    domain,
                    limit,
                    format,
                } => commands::queue::list(&path, &domain, limit, format)?,
                QueueAction::Remove { domain, id } => {
                    commands::queue::remove(&path, &domain, &id)?;
                }
                QueueAction::Clear { domain } => commands::queue::clear(&path, &domain)?,
            }
        }
        Commands::Records {
            domain,
            index,
            value,
            format,
        } => {
            let path = cli.path.ok_or("Data directory required for records")?;
            let filter = index.zip(value);
            commands::records::run(&path, &domain, filter, format)?;
        }
        Commands::Version => {
            println!("stocksync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("stocksync core v{}", stocksync_core::VERSION);
        }
    }

    Ok(())
}
