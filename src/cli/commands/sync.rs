//! `ghost sync` - copy secrets between keepers.

use anyhow::Result;
use clap::Args;

use crate::keeper::sync::{Sync, SyncOptions};
use crate::keeper::BuildEnv;

use super::CommandContext;

/// Arguments for `ghost sync`.
#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Source keeper; defaults to the master keeper
    #[arg(long)]
    pub from: Option<String>,

    /// Destination keeper
    #[arg(long)]
    pub to: String,

    /// Sync only these locations; the whole keeper when omitted
    #[arg(short = 'l', long = "location")]
    pub locations: Vec<String>,

    /// Keep the most recent secret when sources collide on a key
    #[arg(long)]
    pub ignore_duplicates: bool,

    /// Overwrite matching secrets in the destination
    #[arg(long)]
    pub overwrite: bool,

    /// Delete destination secrets that were not gathered
    #[arg(long)]
    pub delete_absent: bool,
}

impl SyncArgs {
    /// Execute the command.
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let from_name = match &self.from {
            Some(name) => name.clone(),
            None => ctx.keeper_name()?,
        };

        let mut env = BuildEnv::new(ctx.config.clone());
        let source = env.build(&from_name).await?;
        let dest = env.build(&self.to).await?;

        let opts = SyncOptions {
            ignore_duplicates: self.ignore_duplicates,
            overwrite_matching: self.overwrite,
        };

        let mut sync = Sync::new();
        if self.locations.is_empty() {
            sync.add_keeper(source.as_ref(), opts).await?;
        } else {
            for location in &self.locations {
                sync.add_location(source.as_ref(), location, opts).await?;
            }
        }

        let written = sync.copy_to(dest.as_ref(), opts).await?;
        println!("{} secrets copied to {}", written, self.to);

        if self.delete_absent {
            let deleted = sync.delete_absent(dest.as_ref(), opts).await?;
            println!("{} absent secrets deleted from {}", deleted, self.to);
        }
        Ok(0)
    }
}
