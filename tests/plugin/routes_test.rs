//! Docker plugin protocol routes.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

use mount_guard::authz::AuthorizationCore;
use mount_guard::config::UserSource;
use mount_guard::plugin::{self, PluginState};
use mount_guard::policy::{PolicyRecord, PolicySet, PolicyStore};

fn state(user_source: UserSource) -> PluginState {
    let store = PolicyStore::with_policies(PolicySet::new(vec![PolicyRecord::new(
        "alice",
        vec!["/data/alice".to_owned()],
    )]));
    PluginState {
        core: AuthorizationCore::new(Arc::new(store)),
        user_source,
    }
}

fn authz_envelope(user: &str, uri: &str, body: Option<&str>) -> String {
    let encoded = body.map(|b| base64::engine::general_purpose::STANDARD.encode(b));
    serde_json::json!({
        "User": user,
        "UserAuthNMethod": "TLS",
        "RequestMethod": "POST",
        "RequestURI": uri,
        "RequestBody": encoded,
        "RequestHeaders": {"Content-Type": "application/json"},
    })
    .to_string()
}

async fn post(
    state: PluginState,
    path: &str,
    body: impl Into<Body>,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/vnd.docker.plugins.v1.2+json")
        .body(body.into())
        .expect("request");
    let response = plugin::router(state)
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes).expect("json response");
    (status, json)
}

#[tokio::test]
async fn activate_advertises_authz() {
    let (status, json) = post(state(UserSource::Container), "/Plugin.Activate", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!({"Implements": ["authz"]}));
}

#[tokio::test]
async fn permitted_create_is_allowed() {
    let envelope = authz_envelope(
        "",
        "/v1.43/containers/create",
        Some(r#"{"Image":"alpine","User":"alice","HostConfig":{"Binds":["/data/alice/logs:/logs"]}}"#),
    );
    let (_, json) = post(state(UserSource::Container), "/AuthZPlugin.AuthZReq", envelope).await;
    assert_eq!(json["Allow"], true);
}

#[tokio::test]
async fn illegal_create_is_denied_with_message() {
    let envelope = authz_envelope(
        "",
        "/v1.43/containers/create",
        Some(r#"{"User":"alice","HostConfig":{"Binds":["/data/alice:/a","/etc:/host-etc:ro"]}}"#),
    );
    let (_, json) = post(state(UserSource::Container), "/AuthZPlugin.AuthZReq", envelope).await;
    assert_eq!(json["Allow"], false);
    let msg = json["Msg"].as_str().expect("msg");
    assert!(msg.contains("alice") && msg.contains("/etc"), "{msg}");
}

#[tokio::test]
async fn authenticated_user_source_matches_client_identity() {
    let envelope = authz_envelope(
        "alice",
        "/containers/create",
        Some(r#"{"User":"root","HostConfig":{"Binds":["/data/alice:/a"]}}"#),
    );
    let (_, json) =
        post(state(UserSource::Authenticated), "/AuthZPlugin.AuthZReq", envelope).await;
    assert_eq!(json["Allow"], true);
}

#[tokio::test]
async fn non_create_calls_are_allowed() {
    let envelope = authz_envelope("", "/v1.43/containers/abc/stop", None);
    let (_, json) = post(state(UserSource::Container), "/AuthZPlugin.AuthZReq", envelope).await;
    assert_eq!(json["Allow"], true);
}

#[tokio::test]
async fn undecodable_create_body_is_denied() {
    let envelope = authz_envelope("", "/containers/create", Some("{not json"));
    let (_, json) = post(state(UserSource::Container), "/AuthZPlugin.AuthZReq", envelope).await;
    assert_eq!(json["Allow"], false);
    assert!(json["Msg"].as_str().is_some_and(|m| m.contains("decode")));
}

#[tokio::test]
async fn lowercase_create_keys_are_still_checked() {
    let envelope = authz_envelope(
        "",
        "/v1.43/containers/create",
        Some(r#"{"User":"alice","hostconfig":{"binds":["/etc:/host-etc"]}}"#),
    );
    let (_, json) = post(state(UserSource::Container), "/AuthZPlugin.AuthZReq", envelope).await;
    assert_eq!(json["Allow"], false);
    let msg = json["Msg"].as_str().expect("msg");
    assert!(msg.contains("/etc"), "{msg}");
}

#[tokio::test]
async fn duplicate_host_config_is_denied() {
    let envelope = authz_envelope(
        "",
        "/v1.43/containers/create",
        Some(
            r#"{"User":"alice","HostConfig":{"Binds":["/data/alice:/a"]},"hostconfig":{"Binds":["/etc:/x"]}}"#,
        ),
    );
    let (_, json) = post(state(UserSource::Container), "/AuthZPlugin.AuthZReq", envelope).await;
    assert_eq!(json["Allow"], false);
    let msg = json["Msg"].as_str().expect("msg");
    assert!(msg.contains("more than one 'HostConfig'"), "{msg}");
}

#[tokio::test]
async fn garbage_envelope_reports_error() {
    let (_, json) = post(state(UserSource::Container), "/AuthZPlugin.AuthZReq", "garbage").await;
    assert_eq!(json["Allow"], false);
    assert!(json["Err"].as_str().is_some());
}

#[tokio::test]
async fn responses_are_always_allowed() {
    let (_, json) = post(state(UserSource::Container), "/AuthZPlugin.AuthZRes", "{}").await;
    assert_eq!(json, serde_json::json!({"Allow": true}));
}

#[tokio::test]
async fn serves_over_unix_socket() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("plugins").join("mount-guard.sock");
    // A stale file from a previous run must not prevent binding.
    std::fs::create_dir_all(socket.parent().expect("parent")).expect("mkdir");
    std::fs::write(&socket, "stale").expect("stale socket");

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn({
        let socket = socket.clone();
        async move {
            plugin::serve(&socket, plugin::router(state(UserSource::Container)), async {
                let _ = stop_rx.await;
            })
            .await
        }
    });

    let mut stream = None;
    for _ in 0..100 {
        if let Ok(s) = tokio::net::UnixStream::connect(&socket).await {
            stream = Some(s);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let mut stream = stream.expect("plugin socket accepts connections");

    stream
        .write_all(
            b"POST /Plugin.Activate HTTP/1.1\r\nHost: plugin\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await
        .expect("write request");
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.expect("read response");
    assert!(raw.starts_with("HTTP/1.1 200"), "{raw}");
    assert!(raw.contains(r#""Implements":["authz"]"#), "{raw}");

    let _ = stop_tx.send(());
    server
        .await
        .expect("server task")
        .expect("server shuts down cleanly");
    assert!(!socket.exists());
}
