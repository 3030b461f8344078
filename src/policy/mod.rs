//! Per-user bind-mount policies.
//!
//! A policy associates one user with the host path prefixes that user may
//! bind-mount into containers. Policies live as flat JSON files in a single
//! directory; the [`loader`] turns that directory into a [`PolicySet`], the
//! [`store`] publishes it to request handlers, and the [`watcher`] keeps it in
//! sync with the filesystem.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

pub mod loader;
pub mod matcher;
pub mod store;
pub mod validator;
pub mod watcher;

pub use loader::{load_all, load_one, scan_dir, PolicyScan};
pub use matcher::{match_user, DENY_ALL};
pub use store::PolicyStore;
pub use validator::{validate, ValidationResult};
pub use watcher::PolicyWatcher;

// ---------------------------------------------------------------------------
// PolicyRecord
// ---------------------------------------------------------------------------

/// A single user's bind-mount allow-list, loaded from one policy file.
///
/// Immutable once loaded. On disk:
///
/// ```json
/// {"user": "alice", "allowedMounts": ["/data/alice"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolicyRecord {
    /// User identifier matched against the request's acting user.
    pub user: String,
    /// Literal path prefixes this user may bind-mount from the host.
    #[serde(rename = "allowedMounts")]
    pub allowed_prefixes: Vec<String>,
}

impl PolicyRecord {
    /// Build a record from a user and its allowed prefixes.
    pub fn new(user: impl Into<String>, allowed_prefixes: Vec<String>) -> Self {
        Self {
            user: user.into(),
            allowed_prefixes,
        }
    }

    /// Returns `true` for a record that allows no mounts at all.
    pub fn is_deny_all(&self) -> bool {
        self.allowed_prefixes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PolicySet
// ---------------------------------------------------------------------------

/// An immutable snapshot of every loaded policy, in load order.
///
/// Load order is the lexicographic order of the policy file names, which makes
/// first-match precedence between duplicate users deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySet {
    records: Arc<[PolicyRecord]>,
    generation: u64,
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PolicySet {
    /// Wrap records (already in load order) as generation 0.
    pub fn new(records: Vec<PolicyRecord>) -> Self {
        Self {
            records: records.into(),
            generation: 0,
        }
    }

    /// The records in load order.
    pub fn records(&self) -> &[PolicyRecord] {
        &self.records
    }

    /// Number of loaded records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when no policy is loaded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// How many times the owning store has been replaced before this set was
    /// committed. Zero for a set that was never committed to a store.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Whether two sets hold the same records, ignoring generation.
    pub fn same_records(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from loading policy files.
///
/// Per-file errors never abort a directory scan: they are logged and the file
/// is skipped.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The policy file could not be opened or read.
    #[error("policy file {} is unreadable: {source}", path.display())]
    Unreadable {
        /// The offending file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON or lacks a required field.
    #[error("policy file {} is malformed: {source}", path.display())]
    MalformedPolicy {
        /// The offending file.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// The policy directory itself could not be listed.
    #[error("policy directory {} is unreadable: {source}", dir.display())]
    DirectoryUnreadable {
        /// The policy directory.
        dir: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    /// The file or directory this error refers to.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Unreadable { path, .. } | Self::MalformedPolicy { path, .. } => path,
            Self::DirectoryUnreadable { dir, .. } => dir,
        }
    }
}
