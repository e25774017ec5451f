//! `ghost set` - create or update a secret.

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::secrets::Secret;

use super::CommandContext;

/// Arguments for `ghost set`.
#[derive(Args, Debug, Clone)]
pub struct SetArgs {
    /// Name of the secret
    pub name: String,

    /// Update a specific secret by id instead of by name
    #[arg(long)]
    pub id: Option<String>,

    /// Username stored with the secret
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Password to store; prompted for when omitted
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Location to store the secret in
    #[arg(short = 'l', long)]
    pub location: Option<String>,

    /// Type string, e.g. login or note
    #[arg(short = 't', long = "type")]
    pub kind: Option<String>,

    /// URL the secret applies to
    #[arg(long)]
    pub url: Option<String>,

    /// Extra fields as key=value, repeatable
    #[arg(long = "field", value_name = "KEY=VALUE")]
    pub fields: Vec<String>,
}

impl SetArgs {
    /// Execute the command.
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let (_, keeper) = ctx.build_keeper().await?;

        let existing = match &self.id {
            Some(id) => Some(keeper.get_secret(id).await?),
            None => {
                let mut matches = keeper.get_secrets_by_name(&self.name).await?;
                match matches.len() {
                    0 => None,
                    1 => Some(matches.remove(0)),
                    n => bail!(
                        "{} secrets are named {:?}; use --id to pick one",
                        n,
                        self.name
                    ),
                }
            }
        };

        let mut secret = match existing {
            Some(found) => found.with_name(&self.name),
            None => Secret::new(&self.name, "", ""),
        };

        if let Some(username) = &self.username {
            secret = secret.with_username(username);
        }
        if let Some(location) = &self.location {
            secret = secret.with_location(location);
        }
        if let Some(kind) = &self.kind {
            secret = secret.with_kind(kind);
        }
        if let Some(url) = &self.url {
            let url = url::Url::parse(url).with_context(|| format!("invalid url {:?}", url))?;
            secret = secret.with_url(url);
        }
        for field in &self.fields {
            let (key, value) = field
                .split_once('=')
                .with_context(|| format!("field {:?} is not KEY=VALUE", field))?;
            secret = secret.with_field(key, value);
        }

        let password = match &self.password {
            Some(given) => given.clone(),
            None => dialoguer::Password::new()
                .with_prompt(format!("Password for {}", self.name))
                .interact()?,
        };
        secret = secret
            .with_password(password)
            .with_last_modified(chrono::Utc::now());

        let stored = keeper.set_secret(secret).await?;
        println!("{}", stored.id());
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: SetArgs,
    }

    #[test]
    fn test_field_flag_parses_repeated() {
        let h = Harness::try_parse_from([
            "set",
            "github",
            "--field",
            "otp=123",
            "--field",
            "note=hi",
            "-p",
            "pw",
        ])
        .unwrap();
        assert_eq!(h.args.fields.len(), 2);
        assert_eq!(h.args.password.as_deref(), Some("pw"));
    }
}
