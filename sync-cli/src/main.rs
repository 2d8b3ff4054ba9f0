//! # homestock-sync
//!
//! Command line client for Homestock offline-first sync.
//!
//! ## Commands
//!
//! - `init`: Initialize device identity
//! - `home`: Create, join and list homes
//! - `todo`: Edit a home's todo list offline
//! - `status`: Show pending changes per collection
//! - `sync`: Run one sync cycle for every home
//!
//! ## Example
//!
//! ```bash
//! # Initialize device
//! homestock-sync init --name "Kitchen tablet"
//!
//! # Create a home and add a todo while offline
//! homestock-sync home create "Lake house"
//! homestock-sync todo add <home-id> "Buy milk"
//!
//! # Sync against a local loopback server
//! homestock-sync sync --loopback
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{home, init, status, sync, todo};

/// Command line client for Homestock offline-first sync.
#[derive(Parser, Debug)]
#[command(name = "homestock-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for device identity and local records
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize device identity
    Init {
        /// Device name
        #[arg(long, short)]
        name: String,
    },

    /// Manage homes
    #[command(subcommand)]
    Home(HomeCommand),

    /// Manage a home's todos
    #[command(subcommand)]
    Todo(TodoCommand),

    /// Show local sync status
    Status,

    /// Run one sync cycle
    Sync {
        /// Sync against a local loopback server persisted in the data dir
        #[arg(long)]
        loopback: bool,

        /// Loopback server state file (defaults to <data-dir>/loopback.json)
        #[arg(long, requires = "loopback")]
        loopback_file: Option<PathBuf>,

        /// Sync configuration file (defaults to <data-dir>/sync.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum HomeCommand {
    /// Create a home on this device
    Create {
        /// Home name
        name: String,
    },
    /// Prepare an existing home so the next sync pulls it
    Join {
        /// Home id shared by another member
        home_id: String,
    },
    /// List homes on this device
    List,
}

#[derive(Subcommand, Debug)]
enum TodoCommand {
    /// Add a todo
    Add {
        /// Home id
        home: String,
        /// Todo text
        text: String,
    },
    /// Mark a todo completed
    Done {
        /// Home id
        home: String,
        /// Todo id
        id: String,
    },
    /// Delete a todo
    Rm {
        /// Home id
        home: String,
        /// Todo id
        id: String,
    },
    /// List open and completed todos
    List {
        /// Home id
        home: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    match cli.command {
        Commands::Init { name } => {
            init::run(&data_dir, &name).await?;
        }
        Commands::Home(command) => match command {
            HomeCommand::Create { name } => {
                home::create(&data_dir, &name).await?;
            }
            HomeCommand::Join { home_id } => home::join(&data_dir, &home_id).await?,
            HomeCommand::List => home::list(&data_dir).await?,
        },
        Commands::Todo(command) => match command {
            TodoCommand::Add { home, text } => {
                todo::add(&data_dir, &home, &text).await?;
            }
            TodoCommand::Done { home, id } => todo::done(&data_dir, &home, &id).await?,
            TodoCommand::Rm { home, id } => todo::remove(&data_dir, &home, &id).await?,
            TodoCommand::List { home } => todo::list(&data_dir, &home).await?,
        },
        Commands::Status => {
            status::run(&data_dir).await?;
        }
        Commands::Sync {
            loopback,
            loopback_file,
            config: config_path,
        } => {
            let target = if loopback {
                sync::Target::Loopback(
                    loopback_file.unwrap_or_else(|| data_dir.join(config::LOOPBACK_FILE)),
                )
            } else {
                sync::Target::Http
            };
            sync::run(&data_dir, target, config_path.as_deref()).await?;
        }
    }

    Ok(())
}

/// Get the default data directory for homestock-sync.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "homestock", "homestock-sync")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
