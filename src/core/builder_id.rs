//! Builder identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::hash::sha256_str;

/// Stable identity of a builder.
///
/// Used as the graph key and as the cache key, so two builders doing the
/// same work must produce the same id across runs. The conventional form is
/// `kind:subject`, e.g. `compile:core-lib`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuilderId(String);

impl BuilderId {
    pub fn new(id: impl Into<String>) -> Self {
        BuilderId(id.into())
    }

    /// Build an id from a builder kind and the subject it works on.
    pub fn scoped(kind: &str, subject: &str) -> Self {
        BuilderId(format!("{}:{}", kind, subject))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-name safe key for the persistent cache.
    pub fn cache_key(&self) -> String {
        sha256_str(&self.0)
    }
}

impl fmt::Display for BuilderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BuilderId {
    fn from(s: &str) -> Self {
        BuilderId::new(s)
    }
}

impl From<String> for BuilderId {
    fn from(s: String) -> Self {
        BuilderId(s)
    }
}
