//! Interactive prompt backend.
//!
//! Questions are declared in configuration; each `get_secret` walks the
//! question's `ask_for` fields, prompting the user for each one, then
//! fills in the preset values. Nothing is ever stored, and every mutation
//! is refused.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::keeper::BuildEnv;
use crate::plugin::{self, BuildError, ValidationError};

use super::error::{SecretError, SecretResult};
use super::keeper::Keeper;
use super::types::Secret;

/// The configuration type string for the human keeper.
pub const TYPE: &str = "human";

/// One configured question: which fields to ask for and which to preset.
#[derive(Debug, Clone, Default)]
pub struct Question {
    ask_for: Vec<String>,
    presets: BTreeMap<String, String>,
}

/// A read-only keeper that asks the user for its secrets.
pub struct HumanKeeper {
    questions: HashMap<String, Question>,
}

impl HumanKeeper {
    /// Create a keeper with no questions.
    pub fn new() -> Self {
        Self {
            questions: HashMap::new(),
        }
    }

    /// Declare a question for the given secret id.
    pub fn add_question(
        &mut self,
        id: impl Into<String>,
        ask_for: Vec<String>,
        presets: BTreeMap<String, String>,
    ) {
        self.questions.insert(id.into(), Question { ask_for, presets });
    }

    fn apply_field(secret: Secret, field: &str, value: &str) -> SecretResult<Secret> {
        Ok(match field {
            "username" => secret.with_username(value),
            "password" => secret.with_password(value),
            "type" => secret.with_kind(value),
            "url" => {
                let url = url::Url::parse(value)
                    .map_err(|err| SecretError::backend(err.to_string(), None))?;
                secret.with_url(url)
            }
            custom => secret.with_field(custom, value),
        })
    }

    fn ask(id: &str, field: &str) -> SecretResult<String> {
        dialoguer::Password::new()
            .with_prompt(format!("Enter {} for {}", field, id))
            .interact()
            .map_err(|err| SecretError::backend(err.to_string(), None))
    }

    fn read_only_err() -> SecretError {
        SecretError::read_only("the human keeper only answers questions")
    }
}

impl Default for HumanKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HumanKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HumanKeeper")
            .field("questions", &self.questions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl Keeper for HumanKeeper {
    /// The human keeper only uses the root location.
    async fn list_locations(&self) -> SecretResult<Vec<String>> {
        Ok(vec![String::new()])
    }

    async fn list_secrets(&self, _location: &str) -> SecretResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_secret(&self, id: &str) -> SecretResult<Secret> {
        let question = self
            .questions
            .get(id)
            .ok_or_else(|| SecretError::not_found(id))?;

        let mut secret = Secret::new(id, "", "").with_id(id);
        for field in &question.ask_for {
            let value = Self::ask(id, field)?;
            secret = Self::apply_field(secret, field, &value)?;
        }
        for (field, value) in &question.presets {
            secret = Self::apply_field(secret, field, value)?;
        }
        Ok(secret)
    }

    /// Id and name are the same thing for questions.
    async fn get_secrets_by_name(&self, name: &str) -> SecretResult<Vec<Secret>> {
        match self.get_secret(name).await {
            Ok(sec) => Ok(vec![sec]),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    async fn set_secret(&self, _secret: Secret) -> SecretResult<Secret> {
        Err(Self::read_only_err())
    }

    async fn copy_secret(&self, _id: &str, _location: &str) -> SecretResult<Secret> {
        Err(Self::read_only_err())
    }

    async fn move_secret(&self, _id: &str, _location: &str) -> SecretResult<Secret> {
        Err(Self::read_only_err())
    }

    async fn delete_secret(&self, _id: &str) -> SecretResult<()> {
        Err(Self::read_only_err())
    }
}

/// Configuration for the human keeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanConfig {
    /// The questions this keeper can answer.
    #[serde(default)]
    pub questions: Vec<QuestionConfig>,
}

/// One configured question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionConfig {
    /// The id the question answers for.
    pub id: String,

    /// Fields to prompt the user for.
    #[serde(default)]
    pub ask_for: Vec<String>,

    /// Fields filled in without prompting.
    #[serde(default)]
    pub presets: BTreeMap<String, String>,
}

fn build(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::BuildFuture<'_> {
    Box::pin(async move {
        let cfg: HumanConfig = env.decode(value)?;
        let mut keeper = HumanKeeper::new();
        for q in cfg.questions {
            keeper.add_question(q.id, q.ask_for, q.presets);
        }
        Ok(Arc::new(keeper) as Arc<dyn Keeper>)
    })
}

fn validate(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::ValidateFuture<'_> {
    Box::pin(async move {
        let cfg: HumanConfig = env.decode(value)?;
        let mut errs = ValidationError::new();

        for q in &cfg.questions {
            if q.id.is_empty() {
                errs.append(BuildError::Invalid(
                    "human question has no id".to_string(),
                ));
            }
            for field in &q.ask_for {
                if q.presets.contains_key(field) {
                    errs.append(BuildError::Invalid(format!(
                        "human question {:?} both asks for and presets field {:?}",
                        q.id, field
                    )));
                }
            }
        }

        errs.into_result()
    })
}

/// Register the human keeper type.
pub(crate) fn register_plugin() {
    plugin::register(
        TYPE,
        plugin::RegisteredPlugin {
            description: "Ask the user for secrets interactively",
            builder: build,
            validator: Some(validate),
        },
    );
}
