//! Election namespace configuration.

use crate::error::{ElectionError, Result};
use crate::ordering::SEQUENCE_SEPARATOR;
use serde::Deserialize;

/// Root node of the election namespace.
pub const DEFAULT_ROOT: &str = "/elect";

/// Member prefix used by the naive strategy.
pub const NAIVE_PREFIX: &str = "naive_";

/// Member prefix used by the contention-free strategy.
pub const CONTENTION_FREE_PREFIX: &str = "ctf_";

/// Where members of an election live and how they are named.
///
/// Distinct prefixes keep strategy families that share a root from
/// competing for the same ordered position space.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Election root (default: `/elect`)
    pub root: String,
    /// Prefix of this family's member names, including the trailing separator
    pub member_prefix: String,
}

impl ElectionConfig {
    /// Configuration for the naive strategy.
    pub fn naive() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
            member_prefix: NAIVE_PREFIX.to_string(),
        }
    }

    /// Configuration for the contention-free strategy.
    pub fn contention_free() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
            member_prefix: CONTENTION_FREE_PREFIX.to_string(),
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_member_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.member_prefix = prefix.into();
        self
    }

    /// Path handed to `create` for a new ephemeral-sequential member.
    pub fn member_path_prefix(&self) -> String {
        format!("{}/{}", self.root, self.member_prefix)
    }

    /// Full path of a member given its bare name.
    pub fn member_path(&self, name: &str) -> String {
        format!("{}/{}", self.root, name)
    }

    /// Whether a child of the root belongs to this family: the exact prefix
    /// followed by nothing but the sequence digits.
    pub fn is_member(&self, name: &str) -> bool {
        name.strip_prefix(self.member_prefix.as_str())
            .is_some_and(|seq| !seq.is_empty() && seq.bytes().all(|b| b.is_ascii_digit()))
    }

    /// Reject a namespace that members could not be ordered in.
    ///
    /// The root must be an absolute path without a trailing slash. The
    /// prefix must be a single path segment ending in the sequence
    /// separator, so the service-appended digits parse back out.
    pub fn validate(&self) -> Result<()> {
        let root = &self.root;
        if !root.starts_with('/') || root.len() < 2 || root.ends_with('/') {
            return Err(ElectionError::InvalidConfig(format!(
                "root must be an absolute path without a trailing slash: {root:?}"
            )));
        }
        let prefix = &self.member_prefix;
        if prefix.contains('/') || !prefix.ends_with(SEQUENCE_SEPARATOR) {
            return Err(ElectionError::InvalidConfig(format!(
                "member prefix must be a name ending in {SEQUENCE_SEPARATOR:?}: {prefix:?}"
            )));
        }
        Ok(())
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self::naive()
    }
}
