//! `ghost config` - manage keeper configuration entries.

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use crate::config::{entry_type, KeeperEntry};
use crate::keeper::check_config;
use crate::plugin;

use super::CommandContext;

/// Subcommands of `ghost config`.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Print a keeper entry as YAML
    Get {
        /// Name of the keeper entry
        name: String,
    },

    /// Create or replace a keeper entry
    Set {
        /// Name of the keeper entry
        name: String,

        /// Keeper type for the entry
        #[arg(short = 't', long = "type")]
        type_name: String,

        /// Backend options as key=value, repeatable
        #[arg(long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// Also make this keeper the master
        #[arg(long)]
        master: bool,
    },

    /// Remove a keeper entry
    Delete {
        /// Name of the keeper entry
        name: String,
    },

    /// List the configured keeper entries
    List,

    /// Validate the whole configuration
    Check,
}

impl ConfigCommand {
    /// Execute the command.
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        match self {
            ConfigCommand::Get { name } => {
                let entry = ctx
                    .config
                    .keeper(name)
                    .with_context(|| format!("no keeper named {:?}", name))?;
                print!("{}", serde_yaml::to_string(entry)?);
            }
            ConfigCommand::Set {
                name,
                type_name,
                options,
                master,
            } => {
                if !plugin::exists(type_name) {
                    bail!("no keeper type named {:?}", type_name);
                }

                let mut entry = KeeperEntry::new();
                entry.insert("type".into(), type_name.as_str().into());
                for option in options {
                    let (key, value) = option
                        .split_once('=')
                        .with_context(|| format!("option {:?} is not KEY=VALUE", option))?;
                    entry.insert(key.into(), coerce(value));
                }

                let mut config = (*ctx.config).clone();
                config.keepers.insert(name.clone(), entry);
                if *master {
                    config.master = Some(name.clone());
                }
                ctx.save_config(&config)?;
                tracing::info!(keeper = %name, "configuration saved");
            }
            ConfigCommand::Delete { name } => {
                let mut config = (*ctx.config).clone();
                if config.keepers.remove(name).is_none() {
                    bail!("no keeper named {:?}", name);
                }
                if config.master.as_deref() == Some(name) {
                    config.master = None;
                }
                ctx.save_config(&config)?;
            }
            ConfigCommand::List => {
                for (name, entry) in &ctx.config.keepers {
                    println!("{}\t{}", name, entry_type(entry).unwrap_or("?"));
                }
            }
            ConfigCommand::Check => {
                check_config(ctx.config.clone()).await?;
                println!("configuration is valid");
            }
        }
        Ok(0)
    }
}

/// Interpret an option value: booleans and integers become typed YAML
/// values, anything else stays a string.
fn coerce(value: &str) -> serde_yaml::Value {
    if let Ok(flag) = value.parse::<bool>() {
        return flag.into();
    }
    if let Ok(number) = value.parse::<i64>() {
        return number.into();
    }
    value.into()
}
