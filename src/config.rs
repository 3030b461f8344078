//! Configuration loading and validation.
//!
//! Loads `config.toml` with per-section defaults. All sections use
//! `#[serde(default)]` so a minimal or empty config file is valid.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Environment variable naming the config file when `--config` is not given.
pub const CONFIG_PATH_ENV: &str = "MOUNT_GUARD_CONFIG";

/// Config file used when neither `--config` nor [`CONFIG_PATH_ENV`] is set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/mount-guard/config.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuardConfig {
    /// Policy directory and reload settings.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Docker plugin socket settings.
    #[serde(default)]
    pub plugin: PluginConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where policies live and how they are reloaded.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Flat directory of policy files.
    #[serde(default = "default_policy_directory")]
    pub directory: PathBuf,

    /// Extension identifying policy files, without the leading dot.
    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    /// Quiet period (milliseconds) used to coalesce bursts of change events.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            directory: default_policy_directory(),
            file_extension: default_file_extension(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Which identity in an intercepted request is matched against policies.
///
/// [`UserSource::Container`] trusts a field the API client writes itself: any
/// client able to reach the daemon can name another user there and be judged
/// by that user's policy. Use [`UserSource::Authenticated`] when Docker is set
/// up with client certificate or authorization-plugin authentication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSource {
    /// The `User` field of the container being created. Client-controlled.
    #[default]
    Container,
    /// The user Docker authenticated the API client as.
    Authenticated,
}

impl std::str::FromStr for UserSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "container" => Ok(Self::Container),
            "authenticated" => Ok(Self::Authenticated),
            other => anyhow::bail!("unknown user source '{other}'"),
        }
    }
}

/// Docker plugin socket settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    /// Unix socket Docker discovers the plugin on.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Identity matched against policies.
    #[serde(default)]
    pub user_source: UserSource,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            user_source: UserSource::default(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Directory for JSON log files with daily rotation. Stderr only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            level: default_log_level(),
        }
    }
}

// Default value functions for serde

fn default_policy_directory() -> PathBuf {
    PathBuf::from("/etc/mount-guard/policies")
}
fn default_file_extension() -> String {
    "json".to_owned()
}
fn default_debounce_ms() -> u64 {
    100
}
fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/docker/plugins/mount-guard.sock")
}
fn default_log_level() -> String {
    "info".to_owned()
}

impl GuardConfig {
    /// Parse configuration from TOML text and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(contents).context("failed to parse config TOML")?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in tests).
    ///
    /// # Errors
    ///
    /// Returns an error if an override value cannot be parsed. Overrides are
    /// applied before logging is up, so a bad value fails like a bad config
    /// file instead of being dropped.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = env("MOUNT_GUARD_POLICY_DIR") {
            self.policy.directory = PathBuf::from(v);
        }
        if let Some(v) = env("MOUNT_GUARD_SOCKET") {
            self.plugin.socket_path = PathBuf::from(v);
        }
        if let Some(v) = env("MOUNT_GUARD_USER_SOURCE") {
            self.plugin.user_source = v
                .parse()
                .context("invalid MOUNT_GUARD_USER_SOURCE override")?;
        }
        Ok(())
    }

    /// Validate that configuration values are usable.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.policy.file_extension.is_empty(),
            "policy.file_extension must not be empty"
        );
        anyhow::ensure!(
            !self.policy.file_extension.contains(&['/', '.'][..]),
            "policy.file_extension must be a bare extension such as 'json'"
        );
        anyhow::ensure!(
            self.plugin.socket_path.is_absolute(),
            "plugin.socket_path must be an absolute path"
        );
        Ok(())
    }

    fn normalize(&mut self) {
        if let Some(stripped) = self.policy.file_extension.strip_prefix('.') {
            self.policy.file_extension = stripped.to_owned();
        }
    }
}

/// Resolve the config file path.
///
/// Returns the path and whether it was named explicitly (flag or env var).
pub fn resolve_config_path(
    cli: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> (PathBuf, bool) {
    if let Some(path) = cli {
        return (path.to_path_buf(), true);
    }
    if let Some(path) = env(CONFIG_PATH_ENV) {
        return (PathBuf::from(path), true);
    }
    (PathBuf::from(DEFAULT_CONFIG_PATH), false)
}

/// Load configuration from a TOML file.
///
/// A missing file is an error only when `required` is set; otherwise
/// defaults are used.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails validation.
pub fn load_config(path: &Path, required: bool) -> anyhow::Result<GuardConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => GuardConfig::from_toml(&contents)
            .with_context(|| format!("invalid config at {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            let config = GuardConfig::default();
            config.validate()?;
            Ok(config)
        }
        Err(e) => Err(e).with_context(|| format!("failed to read config at {}", path.display())),
    }
}

/// Resolve, load, and apply environment overrides in one step.
///
/// # Errors
///
/// Returns an error if the resolved config cannot be loaded or the
/// overridden values fail validation.
pub fn load_effective(cli: Option<&Path>) -> anyhow::Result<GuardConfig> {
    let env = |key: &str| std::env::var(key).ok();
    let (path, required) = resolve_config_path(cli, env);
    let mut config = load_config(&path, required)?;
    config.apply_overrides(env)?;
    config.validate()?;
    Ok(config)
}
