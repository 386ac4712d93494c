//! offsync CLI
//!
//! Command-line offline-first todo client.
//!
//! # Commands
//!
//! - `list` - Show todos, marking ones not yet synced
//! - `add`, `toggle`, `rename`, `remove` - Mutate todos
//! - `sync` - Push pending changes to the server
//! - `pending` - Show changes waiting for a sync pass
//! - `inspect` - Display store statistics and schema
//! - `compact` - Rewrite the store log as a snapshot

mod commands;

use clap::{Parser, Subcommand};
use commands::{Session, SessionOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Offline-first todo client.
#[derive(Parser)]
#[command(name = "offsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local store directory
    #[arg(global = true, short, long, default_value = ".offsync")]
    path: PathBuf,

    /// Base URL of the todo API (e.g. http://localhost:3000/api)
    #[arg(global = true, short, long)]
    server: Option<String>,

    /// Collection path segment on the server
    #[arg(global = true, short, long, default_value = "todos")]
    collection: String,

    /// Work offline even when a server is configured
    #[arg(global = true, long)]
    offline: bool,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show todos, newest first
    List,

    /// Add a todo
    Add {
        /// Title of the new todo
        title: String,
    },

    /// Flip the completed flag of a todo
    Toggle {
        /// Todo identifier
        id: String,
    },

    /// Change the title of a todo
    Rename {
        /// Todo identifier
        id: String,
        /// New title
        title: String,
    },

    /// Delete a todo
    Remove {
        /// Todo identifier
        id: String,
    },

    /// Push pending changes to the server
    Sync,

    /// Show changes waiting for a sync pass
    Pending,

    /// Display store statistics and schema
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite the store log as a single snapshot
    Compact,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let options = SessionOptions {
        path: cli.path,
        server: cli.server,
        collection: cli.collection,
        offline: cli.offline,
    };

    match cli.command {
        Commands::Version => {
            println!("offsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "store schema v{}",
                offsync_store::CURRENT_SCHEMA_VERSION
            );
        }
        Commands::Inspect { format } => {
            let session = Session::open(&options)?;
            commands::inspect::run(&session, &format)?;
        }
        Commands::Compact => {
            let session = Session::open(&options)?;
            commands::compact::run(&session)?;
        }
        Commands::Sync => {
            let session = Session::open(&options)?;
            commands::sync::run(&session).await?;
        }
        Commands::Pending => {
            let session = Session::open(&options)?;
            commands::todos::pending(&session);
        }
        Commands::List => {
            let session = Session::open(&options)?;
            commands::todos::list(&session).await?;
        }
        Commands::Add { title } => {
            let session = Session::open(&options)?;
            commands::todos::add(&session, title).await?;
        }
        Commands::Toggle { id } => {
            let session = Session::open(&options)?;
            commands::todos::toggle(&session, &id).await?;
        }
        Commands::Rename { id, title } => {
            let session = Session::open(&options)?;
            commands::todos::rename(&session, &id, title).await?;
        }
        Commands::Remove { id } => {
            let session = Session::open(&options)?;
            commands::todos::remove(&session, &id).await?;
        }
    }

    Ok(())
}
