//! Docker authorization plugin endpoint.
//!
//! Serves the plugin HTTP protocol on a Unix socket:
//! - `POST /Plugin.Activate` advertises the `authz` capability
//! - `POST /AuthZPlugin.AuthZReq` decides intercepted requests
//! - `POST /AuthZPlugin.AuthZRes` allows every response (responses are not inspected)

use std::future::Future;
use std::path::Path;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tracing::{debug, info, warn};

use crate::authz::{AuthorizationCore, Decision};
use crate::config::UserSource;

pub mod decode;

pub use decode::{decode_request, DecodeError, PluginRequest, PluginResponse};

/// Shared state of the plugin routes.
#[derive(Debug, Clone)]
pub struct PluginState {
    /// Decision engine backed by the live policy store.
    pub core: AuthorizationCore,
    /// Identity matched against policies.
    pub user_source: UserSource,
}

/// Build the plugin router.
pub fn router(state: PluginState) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/AuthZPlugin.AuthZReq", post(authz_request))
        .route("/AuthZPlugin.AuthZRes", post(authz_response))
        .with_state(state)
}

/// Serve `app` on a Unix socket at `socket_path` until `shutdown` resolves.
///
/// A stale socket file left by a previous run is removed before binding, and
/// the socket is removed again on clean shutdown.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound or the server fails.
pub async fn serve<F>(socket_path: &Path, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match std::fs::remove_file(socket_path) {
        Ok(()) => debug!(socket = %socket_path.display(), "removed stale plugin socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| {
                format!("failed to remove stale socket {}", socket_path.display())
            })
        }
    }

    let listener = tokio::net::UnixListener::bind(socket_path)
        .with_context(|| format!("failed to bind {}", socket_path.display()))?;
    info!(socket = %socket_path.display(), "authorization plugin listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("plugin server failed")?;

    if let Err(e) = std::fs::remove_file(socket_path) {
        warn!(socket = %socket_path.display(), error = %e, "failed to remove plugin socket");
    }
    info!("authorization plugin stopped");
    Ok(())
}

async fn activate() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "Implements": ["authz"] }))
}

async fn authz_request(State(state): State<PluginState>, body: Bytes) -> Json<PluginResponse> {
    let request: PluginRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "rejecting unparseable authorization request");
            return Json(PluginResponse::error(format!(
                "invalid authorization request: {e}"
            )));
        }
    };

    debug!(
        method = %request.request_method,
        uri = %request.request_uri,
        user = %request.user,
        "authorization request"
    );

    let decision = match decode_request(&request, state.user_source) {
        Ok(authz) => state.core.decide(&authz),
        Err(e) => {
            warn!(uri = %request.request_uri, error = %e, "denying undecodable create request");
            Decision::deny(format!("unable to decode container create request: {e}"))
        }
    };

    Json(decision.into())
}

async fn authz_response() -> Json<PluginResponse> {
    Json(PluginResponse::allow())
}
