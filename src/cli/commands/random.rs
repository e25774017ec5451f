//! `ghost random-password` - generate a random password.

use anyhow::{bail, Result};
use clap::Args;
use rand::Rng;

use super::CommandContext;

const ASCII_LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const ASCII_UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Arguments for `ghost random-password`.
#[derive(Args, Debug, Clone)]
pub struct RandomArgs {
    /// Password length
    #[arg(short = 'l', long, default_value_t = 20)]
    pub length: usize,

    /// Leave out digits
    #[arg(long)]
    pub no_digits: bool,

    /// Leave out punctuation
    #[arg(long)]
    pub no_symbols: bool,

    /// Leave out letters
    #[arg(long)]
    pub no_letters: bool,
}

impl RandomArgs {
    /// Execute the command.
    pub async fn execute(&self, _ctx: &CommandContext) -> Result<i32> {
        println!("{}", self.generate()?);
        Ok(0)
    }

    fn charset(&self) -> String {
        let mut charset = String::new();
        if !self.no_letters {
            charset.push_str(ASCII_LOWERCASE);
            charset.push_str(ASCII_UPPERCASE);
        }
        if !self.no_digits {
            charset.push_str(DIGITS);
        }
        if !self.no_symbols {
            charset.push_str(PUNCTUATION);
        }
        charset
    }

    fn generate(&self) -> Result<String> {
        let charset: Vec<char> = self.charset().chars().collect();
        if charset.is_empty() {
            bail!("every character class is excluded");
        }
        if self.length == 0 {
            bail!("password length must be positive");
        }

        let mut rng = rand::thread_rng();
        Ok((0..self.length)
            .map(|_| charset[rng.gen_range(0..charset.len())])
            .collect())
    }
}
