//! # Credex CLI Module
//!
//! This module implements the CLI interface for Credex.
//!
//! ## Available Commands
//!
//! - `init` - Initialize a new ledger database
//! - `server` - Start the HTTP server
//! - `snapshot` - Build the daily snapshot for a day
//! - `stance` - Compute normalised stances for a day
//! - `pipeline` - Run snapshot → stance → restake cap for a day or range
//! - `enforce-cap` - Clamp restakes to their endorsement cap
//! - `validate-restake` - Check a proposed restake amount
//! - `delta` - Delta between two users over a cluster, rationale or topic
//! - `contested` - Rank the most contested points of a day

mod commands;

use crate::config::AppConfig;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use credex_core::LedgerResult;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Credex - cred ledger and daily stance analytics
#[derive(Parser, Debug)]
#[command(name = "credex")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the TOML config file (falls back to CREDEX_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the ledger database, overrides the config file
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty ledger database
    Init {
        /// Replace an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Build the daily snapshot (default: today, UTC)
    Snapshot {
        #[arg(short, long)]
        day: Option<NaiveDate>,
    },

    /// Compute normalised stances from the day's snapshot
    Stance {
        #[arg(short, long)]
        day: Option<NaiveDate>,
    },

    /// Run the daily pipeline for one day, or for --from..=--to
    Pipeline {
        #[arg(short, long, conflicts_with_all = ["from", "to"])]
        day: Option<NaiveDate>,

        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
    },

    /// Clamp active restakes down to their owner's endorsement
    EnforceCap {
        #[arg(short, long)]
        user: Option<u64>,

        #[arg(short, long)]
        point: Option<u64>,
    },

    /// Check whether a restake amount fits the user's endorsement
    ValidateRestake {
        #[arg(short, long)]
        user: u64,

        #[arg(short, long)]
        point: u64,

        #[arg(short, long)]
        amount: i64,
    },

    /// Delta between two users on a day
    Delta {
        #[arg(short = 'a', long)]
        user_a: u64,

        #[arg(short = 'b', long)]
        user_b: u64,

        #[arg(short, long)]
        day: Option<NaiveDate>,

        #[command(subcommand)]
        target: DeltaTarget,
    },

    /// Rank points by how evenly their stances are split
    Contested {
        #[arg(short, long)]
        day: Option<NaiveDate>,

        /// Only rank points in this topic
        #[arg(short, long)]
        topic: Option<u64>,

        /// Maximum number of points to print
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

/// Point set a delta is computed over.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum DeltaTarget {
    /// The negation cluster rooted at a point
    Cluster {
        #[arg(short, long)]
        root: u64,
    },
    /// Every cluster a rationale's points belong to
    Rationale {
        #[arg(short, long)]
        id: u64,
    },
    /// Every rationale tagged with a topic
    Topic {
        #[arg(short, long)]
        id: u64,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> LedgerResult<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    if cli.verbose {
        tracing::info!(database = %config.database.display(), space = %config.space, "configuration loaded");
    }
    let json_mode = cli.json_mode;

    match cli.command {
        Commands::Init { force } => cmd_init(&config, json_mode, force),
        Commands::Server { host, port } => cmd_server(&config, &host, port).await,
        Commands::Snapshot { day } => cmd_snapshot(&config, json_mode, day_or_today(day)),
        Commands::Stance { day } => cmd_stance(&config, json_mode, day_or_today(day)),
        Commands::Pipeline { day, from, to } => match (from, to) {
            (Some(from), Some(to)) => cmd_pipeline_range(&config, json_mode, from, to),
            _ => cmd_pipeline(&config, json_mode, day_or_today(day)),
        },
        Commands::EnforceCap { user, point } => cmd_enforce_cap(&config, json_mode, user, point),
        Commands::ValidateRestake {
            user,
            point,
            amount,
        } => cmd_validate_restake(&config, json_mode, user, point, amount),
        Commands::Delta {
            user_a,
            user_b,
            day,
            target,
        } => cmd_delta(&config, json_mode, user_a, user_b, day_or_today(day), target),
        Commands::Contested { day, topic, limit } => {
            cmd_contested(&config, json_mode, day_or_today(day), topic, limit)
        }
    }
}

fn day_or_today(day: Option<NaiveDate>) -> NaiveDate {
    day.unwrap_or_else(|| chrono::Utc::now().date_naive())
}
