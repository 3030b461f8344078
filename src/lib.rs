//! mount-guard — a Docker authorization plugin for bind mounts.
//!
//! Docker routes every API call through the plugin before acting on it. For
//! container-creation calls the plugin matches the acting user to a policy
//! and allows the call only if every requested bind-mount source starts with
//! one of that user's allowed prefixes. Policies are JSON files in a watched
//! directory and reload without a restart.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authz;
pub mod config;
pub mod logging;
pub mod plugin;
pub mod policy;
