//! Errors raised while building or validating keeper configuration.

use std::fmt;
use thiserror::Error;

use crate::secrets::SecretError;

/// Errors that can occur while turning configuration into live keepers.
#[derive(Error, Debug)]
pub enum BuildError {
    /// A named keeper has no configuration entry.
    #[error("no configuration for keeper named {0:?}")]
    UnknownKeeper(String),

    /// A keeper entry names a type no plugin is registered for.
    #[error("keeper {name:?} has incorrect or unregistered type {type_name:?}")]
    UnknownType {
        /// The keeper entry name
        name: String,
        /// The unregistered type string
        type_name: String,
    },

    /// The entry mapping did not decode into the plugin's config schema.
    #[error("unable to structure configuration for {name:?}: {message}")]
    ConfigShape {
        /// The keeper entry name
        name: String,
        /// Decoder error message
        message: String,
    },

    /// Named keeper references recurse.
    #[error("keeper references form a cycle: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    /// A `__SECRET__` reference was malformed or failed to resolve.
    #[error("malformed secret reference: {0}")]
    SecretRef(String),

    /// A plugin-specific configuration rule was violated.
    #[error("{0}")]
    Invalid(String),

    /// One or more accumulated validation failures.
    #[error(transparent)]
    Validation(ValidationError),

    /// A lower error annotated with the keeper it came from.
    #[error("keeper {name:?}: {source}")]
    Context {
        /// The keeper entry name
        name: String,
        /// The underlying error
        #[source]
        source: Box<BuildError>,
    },

    /// A keeper operation failed during secret-reference resolution.
    #[error(transparent)]
    Secret(#[from] SecretError),
}

impl BuildError {
    /// Wrap an error with the name of the keeper entry it came from,
    /// unless it is already annotated with that name.
    pub fn context(name: &str, err: BuildError) -> BuildError {
        match err {
            BuildError::Context {
                name: existing,
                source,
            } if existing == name => BuildError::Context {
                name: existing,
                source,
            },
            other => BuildError::Context {
                name: name.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Check whether this error, or any error nested inside an
    /// accumulated validation error, is a cycle report.
    pub fn is_cycle(&self) -> bool {
        match self {
            BuildError::CycleDetected(_) => true,
            BuildError::Context { source, .. } => source.is_cycle(),
            BuildError::Validation(v) => v.errors().iter().any(BuildError::is_cycle),
            _ => false,
        }
    }
}

/// An accumulating multi-error for configuration validation.
///
/// Appending another `ValidationError` flattens its contents, so nested
/// validation passes collapse into one list; `prefix` annotates every
/// accumulated error with a context such as the keeper name.
#[derive(Debug, Default)]
pub struct ValidationError {
    errors: Vec<BuildError>,
}

impl ValidationError {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error, flattening nested validation errors.
    pub fn append(&mut self, err: BuildError) {
        match err {
            BuildError::Validation(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }

    /// Annotate every accumulated error with a keeper name.
    pub fn prefix(&mut self, name: &str) {
        let errors = std::mem::take(&mut self.errors);
        self.errors = errors
            .into_iter()
            .map(|e| BuildError::context(name, e))
            .collect();
    }

    /// The accumulated errors.
    pub fn errors(&self) -> &[BuildError] {
        &self.errors
    }

    /// Whether anything was accumulated.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse into a result: `Ok` when empty, the full list otherwise.
    pub fn into_result(self) -> Result<(), BuildError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(BuildError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "validation failed with {} errors:", self.errors.len())?;
        for err in &self.errors {
            writeln!(f, " - {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}
