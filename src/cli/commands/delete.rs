//! `ghost delete` - remove a secret.

use anyhow::Result;
use clap::Args;

use super::{resolve_secret, CommandContext};

/// Arguments for `ghost delete`.
#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Id or name of the secret
    pub secret: String,
}

impl DeleteArgs {
    /// Execute the command.
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let (_, keeper) = ctx.build_keeper().await?;
        let secret = resolve_secret(keeper.as_ref(), &self.secret).await?;
        keeper.delete_secret(secret.id()).await?;
        tracing::info!(id = %secret.id(), name = %secret.name(), "secret deleted");
        Ok(0)
    }
}
