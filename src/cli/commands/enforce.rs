//! `ghost enforce-policy` - run a policy's lifetime sweep once.

use anyhow::{bail, Result};
use clap::Args;

use crate::keeper::BuildEnv;

use super::CommandContext;

/// Arguments for `ghost enforce-policy`.
#[derive(Args, Debug, Clone)]
pub struct EnforceArgs {
    /// Name of the policy keeper to enforce
    pub name: String,
}

impl EnforceArgs {
    /// Execute the command.
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        if ctx.config.keeper(&self.name).is_none() {
            bail!("keeper {:?} is not configured", self.name);
        }

        let mut env = BuildEnv::new(ctx.config.clone());
        env.build(&self.name).await?;
        let Some(policy) = env.policy(&self.name) else {
            bail!("keeper {:?} is not a policy keeper", self.name);
        };

        let deleted = policy.enforce_globally().await?;
        println!("{} expired secrets deleted", deleted);
        Ok(0)
    }
}
