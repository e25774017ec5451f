//! `ghost get` - fetch a secret.

use anyhow::{bail, Result};
use clap::Args;

use crate::cli::OutputFormat;
use crate::secrets::Secret;

use super::{resolve_secret, CommandContext};

/// Arguments for `ghost get`.
#[derive(Args, Debug, Clone)]
pub struct GetArgs {
    /// Id or name of the secret
    pub secret: String,

    /// Output format
    #[arg(short = 'o', long, default_value = "pretty")]
    pub output: OutputFormat,

    /// Print a single attribute or custom field instead
    #[arg(short = 'f', long)]
    pub field: Option<String>,

    /// Show the password in pretty output
    #[arg(long)]
    pub show_password: bool,
}

impl GetArgs {
    /// Execute the command.
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let (_, keeper) = ctx.build_keeper().await?;
        let secret = resolve_secret(keeper.as_ref(), &self.secret).await?;

        if let Some(field) = &self.field {
            match secret.attribute(field) {
                Some(value) => println!("{}", value),
                None => bail!("secret {:?} has no field {:?}", self.secret, field),
            }
            return Ok(0);
        }

        match self.output {
            OutputFormat::Pretty => self.print_pretty(&secret),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&secret)?),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&secret)?),
            OutputFormat::Env => print_env(&secret),
            OutputFormat::Password => println!("{}", secret.password()),
        }
        Ok(0)
    }

    fn print_pretty(&self, secret: &Secret) {
        println!("id:       {}", secret.id());
        println!("name:     {}", secret.name());
        println!("username: {}", secret.username());
        if self.show_password {
            println!("password: {}", secret.password());
        } else {
            println!("password: ********");
        }
        if !secret.kind().is_empty() {
            println!("type:     {}", secret.kind());
        }
        if let Some(url) = secret.url() {
            println!("url:      {}", url);
        }
        if !secret.location().is_empty() {
            println!("location: {}", secret.location());
        }
        for (name, value) in secret.fields() {
            println!("{}: {}", name, value);
        }
        println!("modified: {}", secret.last_modified().to_rfc3339());
    }
}

fn print_env(secret: &Secret) {
    println!("export GHOST_NAME={}", shell_quote(secret.name()));
    println!("export GHOST_USERNAME={}", shell_quote(secret.username()));
    println!("export GHOST_PASSWORD={}", shell_quote(secret.password()));
    if !secret.url_string().is_empty() {
        println!("export GHOST_URL={}", shell_quote(&secret.url_string()));
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
