//! Command-line interface for ghost.
//!
//! This module provides argument parsing and the subcommand
//! implementations: secret CRUD, configuration management, service
//! control, policy enforcement, cross-keeper sync, and password
//! generation.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Ghost - a personal secret-management toolkit
///
/// Unifies secret stores behind one keeper interface and composes them
/// with routing, fallback, policy, and caching middleware.
#[derive(Parser, Debug, Clone)]
#[command(name = "ghost")]
#[command(version)]
#[command(about = "Manage secrets across keepers", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(short = 'c', long, global = true, env = "GHOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Keeper to operate on (defaults to the configured master keeper)
    #[arg(short = 'k', long, global = true)]
    pub keeper: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The verbosity level from repeated `-v` flags.
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

/// Output format for `ghost get`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with the password masked
    #[default]
    Pretty,
    /// YAML document
    Yaml,
    /// JSON document
    Json,
    /// Shell export lines
    Env,
    /// Bare password only
    Password,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Fetch a secret
    Get(commands::get::GetArgs),

    /// Create or update a secret
    Set(commands::set::SetArgs),

    /// Delete a secret
    Delete(commands::delete::DeleteArgs),

    /// List secrets, locations, keepers, or plugins
    #[command(subcommand)]
    List(commands::list::ListCommand),

    /// Manage keeper configuration
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),

    /// Control the ghost agent
    #[command(subcommand)]
    Service(commands::service::ServiceCommand),

    /// Run the lifetime sweep of a policy keeper once
    EnforcePolicy(commands::enforce::EnforceArgs),

    /// Copy secrets between keepers
    Sync(commands::sync::SyncArgs),

    /// Generate a random password
    RandomPassword(commands::random::RandomArgs),
}
