//! Subcommand implementations for the ghost CLI.

pub mod config;
pub mod delete;
pub mod enforce;
pub mod get;
pub mod list;
pub mod random;
pub mod service;
pub mod set;
pub mod sync;

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::keeper::BuildEnv;
use crate::secrets::{Keeper, Secret};

/// Common context shared between commands.
pub struct CommandContext {
    /// The loaded configuration.
    pub config: Arc<Config>,
    /// Where the configuration came from, for saving.
    pub config_path: Option<PathBuf>,
    /// Keeper named on the command line, overriding the master.
    pub keeper_override: Option<String>,
}

impl CommandContext {
    /// Create a command context from parsed CLI arguments.
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        Self {
            config: Arc::new(config),
            config_path: cli.config.clone(),
            keeper_override: cli.keeper.clone(),
        }
    }

    /// The keeper the invocation operates on.
    pub fn keeper_name(&self) -> Result<String> {
        Ok(self
            .config
            .resolve_keeper_name(self.keeper_override.as_deref())?
            .to_string())
    }

    /// Build the keeper named on the command line (or the master),
    /// returning the build environment alongside it.
    pub async fn build_keeper(&self) -> Result<(BuildEnv, Arc<dyn Keeper>)> {
        let name = self.keeper_name()?;
        let mut env = BuildEnv::new(self.config.clone());
        let keeper = env.build(&name).await?;
        Ok((env, keeper))
    }

    /// Persist the given configuration to the path this invocation loaded
    /// from.
    pub fn save_config(&self, config: &Config) -> Result<()> {
        config.save(self.config_path.as_deref())
    }
}

/// Resolve one secret by id or name through a keeper: an id hit wins,
/// otherwise the name must match exactly one secret.
pub(crate) async fn resolve_secret(keeper: &dyn Keeper, what: &str) -> Result<Secret> {
    match keeper.get_secret(what).await {
        Ok(secret) => return Ok(secret),
        Err(err) if err.is_not_found() => {}
        Err(err) => return Err(err.into()),
    }

    let mut matches = keeper.get_secrets_by_name(what).await?;
    match matches.len() {
        0 => bail!("no secret with id or name {:?}", what),
        1 => Ok(matches.remove(0)),
        n => bail!(
            "{} secrets are named {:?}; use the id to pick one",
            n,
            what
        ),
    }
}
