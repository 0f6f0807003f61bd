//! Tome CLI
//!
//! Command-line interface for tome - book records, marks, sync and
//! migration inside a notes vault.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tome_core::sync::CanvasType;
use tome_core::{Config, RecordStore, ResolutionStrategy, StoreError};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "tome")]
#[command(about = "Tome - Records, marks and analysis sync for serialized fiction")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Vault root directory
    #[arg(long, global = true, default_value = ".")]
    vault: PathBuf,

    /// Config file (defaults to ~/.config/tome/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or patch a book's database
    Init {
        /// Book folder, relative to the vault
        book: PathBuf,
        #[arg(short = 'T', long)]
        title: Option<String>,
        #[arg(short, long)]
        author: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Show a book's metadata and record counts
    Status {
        book: PathBuf,
    },
    /// List a book's chapters
    #[command(alias = "ls")]
    Chapters {
        book: PathBuf,
        /// Write id headers into chapters that lack them
        #[arg(long)]
        inject: bool,
    },
    /// Print the text of a chapter range (1-based, inclusive)
    Content {
        book: PathBuf,
        start: u32,
        end: u32,
    },
    /// Merge an analysis result (JSON file) into a book
    Analyze {
        book: PathBuf,
        /// Analysis result file
        file: PathBuf,
        /// Resolve every conflict right away (ai, manual or merge)
        #[arg(long)]
        resolve: Option<ResolutionStrategy>,
    },
    /// Project a book's records onto a canvas
    Canvas {
        book: PathBuf,
        /// character or story
        canvas_type: CanvasType,
    },
    /// Migrate one book's legacy marks and materials
    Migrate {
        book: PathBuf,
        /// Only report whether migration is needed
        #[arg(long)]
        check: bool,
    },
    /// Migrate every book under a library folder
    MigrateAll {
        library: PathBuf,
    },
    /// List a book's marks
    Marks {
        book: PathBuf,
        /// Only marks of this type
        #[arg(short = 't', long = "type")]
        mark_type: Option<String>,
    },
    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    init_logging(&config, cli.verbose);

    // Commands that don't need the store
    if let Commands::Config { command } = &cli.command {
        return match command {
            Some(ConfigCommands::Show) | None => {
                commands::config::show(&config, cli.config.as_ref(), &output)
            }
        };
    }

    debug!(vault = ?cli.vault, "Opening vault");
    let store = Arc::new(RecordStore::open(&cli.vault, config));

    let result = match cli.command {
        Commands::Init {
            book,
            title,
            author,
            description,
        } => commands::book::init(&store, &book, title, author, description, &output),
        Commands::Status { book } => commands::book::status(&store, &book, &output),
        Commands::Chapters { book, inject } => {
            commands::chapters::list(&store, &book, inject, &output)
        }
        Commands::Content { book, start, end } => {
            commands::chapters::content(&store, &book, start, end, &output)
        }
        Commands::Analyze {
            book,
            file,
            resolve,
        } => commands::analyze::run(&store, &book, &file, resolve, &output),
        Commands::Canvas { book, canvas_type } => {
            commands::canvas::sync(&store, &book, canvas_type, &output)
        }
        Commands::Migrate { book, check } => {
            commands::migrate::book(&store, &book, check, &output)
        }
        Commands::MigrateAll { library } => commands::migrate::all(&store, &library, &output),
        Commands::Marks { book, mark_type } => {
            commands::marks::list(&store, &book, mark_type, &output)
        }
        Commands::Config { .. } => unreachable!(), // Handled above
    };

    if let Err(e) = &result {
        let hint = e
            .chain()
            .find_map(|cause| cause.downcast_ref::<StoreError>())
            .and_then(StoreError::recovery_suggestion);
        if let (Some(hint), false) = (hint, output.is_quiet()) {
            eprintln!("hint: {}", hint);
        }
    }

    result
}

/// Initialize logging
///
/// Off unless TOME_LOG is set or --verbose is given. Logs go to
/// config.log_file when set, otherwise to stderr.
fn init_logging(config: &Config, verbose: bool) {
    let log_level = match std::env::var("TOME_LOG") {
        Ok(level) if !level.is_empty() => level,
        _ if verbose => "debug".to_string(),
        _ => return,
    };

    let env_filter = EnvFilter::new(format!("tome_core={},tome_cli={}", log_level, log_level));

    // Ignore error if already initialized
    match &config.log_file {
        Some(path) => {
            let file = match OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                    return;
                }
            };
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(file)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}
