//! `ghost list` - enumerate secrets, locations, keepers, and plugins.

use anyhow::Result;
use clap::Subcommand;

use crate::config::entry_type;
use crate::plugin;

use super::CommandContext;

/// Subcommands of `ghost list`.
#[derive(Subcommand, Debug, Clone)]
pub enum ListCommand {
    /// List secret ids in a location
    Secrets {
        /// The location to list; the root location when omitted
        location: Option<String>,
    },

    /// List the locations present in the keeper
    Locations,

    /// List the configured keepers
    Keepers,

    /// List the registered keeper types
    Plugins,
}

impl ListCommand {
    /// Execute the command.
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        match self {
            ListCommand::Secrets { location } => {
                let (_, keeper) = ctx.build_keeper().await?;
                let location = location.as_deref().unwrap_or("");
                for id in keeper.list_secrets(location).await? {
                    println!("{}", id);
                }
            }
            ListCommand::Locations => {
                let (_, keeper) = ctx.build_keeper().await?;
                for location in keeper.list_locations().await? {
                    println!("{}", location);
                }
            }
            ListCommand::Keepers => {
                for (name, entry) in &ctx.config.keepers {
                    let type_name = entry_type(entry).unwrap_or("?");
                    let master = match &ctx.config.master {
                        Some(master) if master == name => " (master)",
                        _ => "",
                    };
                    println!("{}\t{}{}", name, type_name, master);
                }
            }
            ListCommand::Plugins => {
                for name in plugin::list() {
                    let description = plugin::describe(&name).unwrap_or_default();
                    println!("{}\t{}", name, description);
                }
            }
        }
        Ok(0)
    }
}
