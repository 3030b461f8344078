//! mount-guard CLI entry point.
//!
//! Provides `start`, `check`, and `evaluate` subcommands for running the
//! authorization plugin, validating a policy directory, or dry-running a
//! decision.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use mount_guard::authz::{decide_against, AuthorizationCore, AuthzRequest};
use mount_guard::config::{self, GuardConfig};
use mount_guard::logging;
use mount_guard::plugin::{self, PluginState};
use mount_guard::policy::{self, PolicyStore, PolicyWatcher};

/// mount-guard — Docker authorization plugin enforcing per-user bind-mount policies.
#[derive(Parser)]
#[command(name = "mount-guard", version, about)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the authorization plugin.
    Start,
    /// Load the policy directory once and report what was loaded.
    Check,
    /// Decide a hypothetical container-creation request.
    Evaluate {
        /// Acting user of the request.
        #[arg(long)]
        user: String,
        /// Requested bind-mount source path (repeatable).
        #[arg(long = "bind")]
        binds: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_effective(cli.config.as_deref())?;

    match cli.command {
        Command::Start => handle_start(config).await,
        Command::Check => handle_check(&config),
        Command::Evaluate { user, binds } => handle_evaluate(&config, user, binds),
    }
}

/// Run the plugin until SIGINT/SIGTERM.
async fn handle_start(config: GuardConfig) -> anyhow::Result<()> {
    let _logging_guard = logging::init_service(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "mount-guard starting");

    // Requests must never be decided before policies are loaded.
    let scan = policy::scan_dir(&config.policy.directory, &config.policy.file_extension)
        .context("initial policy load failed")?;
    info!(
        count = scan.records.len(),
        rejected = scan.rejected.len(),
        dir = %config.policy.directory.display(),
        "initial policies loaded"
    );
    let store = Arc::new(PolicyStore::with_policies(scan.into_set()));

    let _watcher = match PolicyWatcher::spawn(&config.policy, Arc::clone(&store)) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            error!(error = %e, "policy hot-reload unavailable; serving the initial policies only");
            None
        }
    };

    let state = PluginState {
        core: AuthorizationCore::new(store),
        user_source: config.plugin.user_source,
    };
    plugin::serve(
        &config.plugin.socket_path,
        plugin::router(state),
        shutdown_signal(),
    )
    .await
}

/// Scan the policy directory and print the result.
fn handle_check(config: &GuardConfig) -> anyhow::Result<()> {
    logging::init_cli();

    let scan = policy::scan_dir(&config.policy.directory, &config.policy.file_extension)?;
    println!(
        "{} policies loaded from {}",
        scan.records.len(),
        config.policy.directory.display()
    );
    for record in &scan.records {
        println!("  {}: {}", record.user, record.allowed_prefixes.join(", "));
    }
    for rejected in &scan.rejected {
        println!("  rejected {rejected}");
    }

    anyhow::ensure!(
        scan.rejected.is_empty(),
        "{} policy file(s) rejected",
        scan.rejected.len()
    );
    Ok(())
}

/// Decide a request against the policy directory as it is now.
fn handle_evaluate(config: &GuardConfig, user: String, binds: Vec<String>) -> anyhow::Result<()> {
    logging::init_cli();

    let policies =
        policy::scan_dir(&config.policy.directory, &config.policy.file_extension)?.into_set();
    let decision = decide_against(&policies, &AuthzRequest::mounts(user, binds));

    match decision.reason {
        Some(reason) if !decision.allow => println!("deny: {reason}"),
        _ => println!("allow"),
    }
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
