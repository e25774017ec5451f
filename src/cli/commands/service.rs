//! `ghost service` - control the long-running agent.

use anyhow::Result;
use clap::Subcommand;
use std::time::Duration;

use crate::config::entry_type;
use crate::keeper::service::{self, Agent, ServicePaths, StopImmediacy};
use crate::keeper::BuildEnv;
use crate::secrets::policy;

use super::CommandContext;

/// Subcommands of `ghost service`.
#[derive(Subcommand, Debug, Clone)]
pub enum ServiceCommand {
    /// Start the agent in the foreground
    Start {
        /// Period between policy enforcement sweeps
        #[arg(long, default_value = "10m", value_parser = humantime::parse_duration)]
        enforcement_period: Duration,
    },

    /// Stop the running agent
    Stop {
        /// Cancel in-flight requests instead of draining them
        #[arg(long)]
        quit: bool,

        /// Kill the agent outright
        #[arg(long, conflicts_with = "quit")]
        kill: bool,
    },

    /// Report whether the agent is running
    Status,
}

impl ServiceCommand {
    /// Execute the command.
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        match self {
            ServiceCommand::Start { enforcement_period } => {
                let name = ctx.keeper_name()?;
                let mut env = BuildEnv::new(ctx.config.clone());
                let keeper = env.build(&name).await?;

                // Every configured policy keeper gets an enforcement
                // worker, whether or not the served keeper wraps it.
                let mut policies = Vec::new();
                for (entry_name, entry) in &ctx.config.keepers {
                    if entry_type(entry) != Some(policy::TYPE) {
                        continue;
                    }
                    env.build(entry_name).await?;
                    if let Some(found) = env.policy(entry_name) {
                        policies.push((entry_name.clone(), found));
                    }
                }

                let agent = Agent {
                    keeper,
                    keeper_name: name,
                    policies,
                    enforcement_period: *enforcement_period,
                    paths: ServicePaths::default(),
                };
                agent.run().await?;
            }
            ServiceCommand::Stop { quit, kill } => {
                let immediacy = match (*quit, *kill) {
                    (_, true) => StopImmediacy::Now,
                    (true, _) => StopImmediacy::Quick,
                    _ => StopImmediacy::Graceful,
                };
                service::stop(immediacy)?;
            }
            ServiceCommand::Status => match service::status().await {
                Ok(info) => {
                    if info.enforced_policies.is_empty() {
                        println!("ghost is running: pid={} keeper={:?}", info.pid, info.keeper);
                    } else {
                        let period = info
                            .enforcement_period
                            .map(|p| humantime::format_duration(p).to_string())
                            .unwrap_or_else(|| "?".to_string());
                        println!(
                            "ghost is running: pid={} keeper={:?} enforcing {:?} every {}",
                            info.pid, info.keeper, info.enforced_policies, period
                        );
                    }
                }
                Err(err) => {
                    println!("ghost is not running: {}", err);
                    return Ok(1);
                }
            },
        }
        Ok(0)
    }
}

