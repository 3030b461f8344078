//! Bind-mount validation against an allow-list.
//!
//! The check is a literal string-prefix comparison: no canonicalization, no
//! symlink resolution, no separator handling. An allowed prefix of `/data`
//! therefore also admits `/database/secrets`. Policies that need a directory
//! boundary should end their prefixes with `/`.

/// Result of validating requested mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Every requested path starts with an allowed prefix.
    Pass,
    /// The first requested path that matched no allowed prefix.
    Fail {
        /// The rejected source path.
        offending_path: String,
    },
}

impl ValidationResult {
    /// Returns `true` when validation passed.
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Check that every entry of `requested` starts with some entry of `allowed`.
///
/// Stops at the first failing path. An empty `requested` list always passes.
pub fn validate<S, P>(requested: &[S], allowed: &[P]) -> ValidationResult
where
    S: AsRef<str>,
    P: AsRef<str>,
{
    for path in requested {
        let path: &str = path.as_ref();
        let permitted = allowed.iter().any(|prefix| {
            let prefix: &str = prefix.as_ref();
            path.starts_with(prefix)
        });
        if !permitted {
            return ValidationResult::Fail {
                offending_path: path.to_owned(),
            };
        }
    }
    ValidationResult::Pass
}
