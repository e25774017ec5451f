//! Whole-configuration validation.

use std::sync::Arc;

use crate::config::Config;
use crate::plugin::{BuildError, ValidationError};

use super::BuildEnv;

/// Validate every named keeper in the configuration, plus the master
/// keeper reference. All problems are accumulated and returned together,
/// each prefixed with the keeper it belongs to.
pub async fn check_config(config: Arc<Config>) -> Result<(), BuildError> {
    let mut errs = ValidationError::new();
    let mut env = BuildEnv::new(config.clone());

    for name in config.keepers.keys() {
        if let Err(err) = env.validate(name).await {
            errs.append(err);
        }
    }

    if let Some(master) = &config.master {
        if !config.keepers.contains_key(master) {
            errs.append(BuildError::Invalid(format!(
                "master keeper {:?} does not exist",
                master
            )));
        }
    }

    errs.into_result()
}
