//! Policy file loading.
//!
//! A directory scan never fails because of a single bad file: unreadable and
//! malformed files are logged, recorded in [`PolicyScan::rejected`], and
//! skipped. Only failing to list the directory itself is an error.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{LoadError, PolicyRecord, PolicySet};

/// Outcome of loading a batch of policy files.
#[derive(Debug, Default)]
pub struct PolicyScan {
    /// Well-formed records in load order (lexicographic by file name).
    pub records: Vec<PolicyRecord>,
    /// Files that were skipped, with the reason.
    pub rejected: Vec<LoadError>,
}

impl PolicyScan {
    /// Consume the scan, keeping only the loaded records.
    pub fn into_set(self) -> PolicySet {
        PolicySet::new(self.records)
    }
}

/// Load and parse a single policy file.
///
/// # Errors
///
/// Returns [`LoadError::Unreadable`] if the file cannot be read and
/// [`LoadError::MalformedPolicy`] if it is not a valid policy document.
pub fn load_one(path: &Path) -> Result<PolicyRecord, LoadError> {
    let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| LoadError::MalformedPolicy {
        path: path.to_path_buf(),
        source,
    })
}

/// Load every policy file among `entries`.
///
/// Entries without the policy `extension` (compared without the leading dot)
/// are ignored. The remaining files are loaded in lexicographic order, so when
/// two files declare the same user the earlier file name wins at match time.
pub fn load_all<I>(entries: I, extension: &str) -> PolicyScan
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut candidates: Vec<PathBuf> = entries
        .into_iter()
        .filter(|path| has_extension(path, extension))
        .collect();
    candidates.sort();

    let mut scan = PolicyScan::default();
    let mut seen_users = HashSet::new();

    for path in candidates {
        match load_one(&path) {
            Ok(record) => {
                if !seen_users.insert(record.user.clone()) {
                    warn!(
                        user = %record.user,
                        path = %path.display(),
                        "duplicate policy for user; an earlier file takes precedence"
                    );
                }
                debug!(
                    user = %record.user,
                    path = %path.display(),
                    prefixes = record.allowed_prefixes.len(),
                    "loaded policy"
                );
                scan.records.push(record);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping invalid policy file");
                scan.rejected.push(e);
            }
        }
    }

    scan
}

/// List `dir` (non-recursively) and load every policy file in it.
///
/// # Errors
///
/// Returns [`LoadError::DirectoryUnreadable`] if the directory cannot be listed.
pub fn scan_dir(dir: &Path, extension: &str) -> Result<PolicyScan, LoadError> {
    let unreadable = |source| LoadError::DirectoryUnreadable {
        dir: dir.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if path.is_dir() {
            continue;
        }
        entries.push(path);
    }

    Ok(load_all(entries, extension))
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(extension.trim_start_matches('.'))
}
