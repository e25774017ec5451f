//! Ghost - a personal secret-management toolkit
//!
//! This is the main entry point for the ghost CLI.

use anyhow::Result;
use ghost::cli::commands::CommandContext;
use ghost::cli::{Cli, Commands};
use ghost::config::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbosity());
    ghost::plugin::install_builtin();

    let config = Config::load(cli.config.as_deref()).unwrap_or_else(|err| {
        eprintln!("Warning: failed to load config: {}", err);
        Config::default()
    });

    let ctx = CommandContext::new(&cli, config);

    let exit_code = match &cli.command {
        Commands::Get(args) => args.execute(&ctx).await?,
        Commands::Set(args) => args.execute(&ctx).await?,
        Commands::Delete(args) => args.execute(&ctx).await?,
        Commands::List(args) => args.execute(&ctx).await?,
        Commands::Config(args) => args.execute(&ctx).await?,
        Commands::Service(args) => args.execute(&ctx).await?,
        Commands::EnforcePolicy(args) => args.execute(&ctx).await?,
        Commands::Sync(args) => args.execute(&ctx).await?,
        Commands::RandomPassword(args) => args.execute(&ctx).await?,
    };

    std::process::exit(exit_code);
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}
