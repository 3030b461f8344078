//! User-to-policy matching.

use tracing::debug;

use super::PolicyRecord;

/// Fallback record applied when no policy names the requesting user.
///
/// Its allow-list is empty, so every non-empty mount request fails against it.
pub static DENY_ALL: PolicyRecord = PolicyRecord {
    user: String::new(),
    allowed_prefixes: Vec::new(),
};

/// Return the first record (in load order) whose user equals `user`, or
/// [`DENY_ALL`] when none does.
///
/// A missing policy and an explicit policy with no prefixes behave the same.
pub fn match_user<'a>(records: &'a [PolicyRecord], user: &str) -> &'a PolicyRecord {
    match records.iter().find(|record| record.user == user) {
        Some(record) => {
            debug!(user, prefixes = record.allowed_prefixes.len(), "matched policy");
            record
        }
        None => {
            debug!(user, "no policy for user; applying deny-all default");
            &DENY_ALL
        }
    }
}
