//! Stored credentials that must never end up in a log.

use std::fmt;

use derive_more::{Display, Error};

const ENV_PREFIX: &str = "env:";
const MASK: &str = "********";

/// A stored secret (database password, S3 key, SSH password).
///
/// Debug and Display output is masked. The plain value is only available
/// through [`Secret::reveal`].
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

/// The environment variable a secret refers to is not set.
#[derive(Debug, Display, Error)]
#[display("Secret refers to unset environment variable {_0}")]
pub struct UnresolvedSecret(#[error(ignore)] String);

impl Secret {
    /// Create a secret from its stored representation.
    pub fn new(stored: impl Into<String>) -> Self {
        Self(stored.into())
    }

    /// Resolve the plain value.
    ///
    /// Stored values of the form `env:NAME` are read from the environment,
    /// everything else is taken literally.
    pub fn reveal(&self) -> Result<String, UnresolvedSecret> {
        match self.0.strip_prefix(ENV_PREFIX) {
            Some(var) => std::env::var(var).map_err(|_| UnresolvedSecret(var.to_string())),
            None => Ok(self.0.clone()),
        }
    }

    /// An empty secret counts as not configured.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}
