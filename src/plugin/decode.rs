//! Decoding of Docker authorization plugin requests.
//!
//! Docker forwards every API call to the plugin as a JSON envelope carrying
//! the HTTP method, URI, authenticated user, and the raw request body
//! (base64-encoded). Only container-creation calls are turned into a
//! [`MountRequest`](crate::authz::MountRequest); everything else is not
//! subject to mount policies.
//!
//! Docker reads the create body with Go's `encoding/json`, which matches
//! object keys case-insensitively. The fields policies inspect are looked up
//! the same way here, and a body naming one of them more than once (in any
//! casing) is rejected rather than guessed at.

use std::fmt;

use base64::Engine;
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::authz::{AuthzRequest, Decision};
use crate::config::UserSource;

/// Errors from decoding an intercepted container-creation body.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// `RequestBody` is not valid base64.
    #[error("request body is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The body is not a valid container-create document.
    #[error("container create body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// An inspected field appears more than once, counting case variants.
    #[error("container create body has more than one '{0}' key")]
    DuplicateKey(&'static str),
}

/// Request envelope Docker posts to `/AuthZPlugin.AuthZReq`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginRequest {
    /// User Docker authenticated the client as; empty without client auth.
    #[serde(default)]
    pub user: String,
    /// Authentication method used for `user`.
    #[serde(default, rename = "UserAuthNMethod")]
    pub user_authn_method: String,
    /// HTTP method of the intercepted call.
    #[serde(default)]
    pub request_method: String,
    /// URI of the intercepted call, possibly API-version prefixed.
    #[serde(default, rename = "RequestURI")]
    pub request_uri: String,
    /// Base64 of the raw request body, `null` when the call has none.
    #[serde(default)]
    pub request_body: Option<String>,
}

/// Response envelope returned to Docker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginResponse {
    /// Whether Docker may proceed with the call.
    pub allow: bool,
    /// Message shown to the client on deny.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub msg: String,
    /// Plugin-side failure description.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub err: String,
}

impl PluginResponse {
    /// Unconditional allow.
    pub fn allow() -> Self {
        Self {
            allow: true,
            msg: String::new(),
            err: String::new(),
        }
    }

    /// Deny because the plugin could not process the request.
    pub fn error(err: impl Into<String>) -> Self {
        Self {
            allow: false,
            msg: String::new(),
            err: err.into(),
        }
    }
}

impl From<Decision> for PluginResponse {
    fn from(decision: Decision) -> Self {
        Self {
            allow: decision.allow,
            msg: decision.reason.unwrap_or_default(),
            err: String::new(),
        }
    }
}

/// The fields of a `POST /containers/create` body that policies inspect.
#[derive(Debug, Default)]
struct CreateContainerBody {
    user: Option<String>,
    host_config: Option<HostConfig>,
}

impl CreateContainerBody {
    fn parse(raw: &[u8]) -> Result<Self, DecodeError> {
        let body: Members = serde_json::from_slice(raw)?;
        let host_config = match body.field::<Option<Members>>("HostConfig")?.flatten() {
            Some(members) => Some(parse_host_config(&members)?),
            None => None,
        };
        Ok(Self {
            user: body.field::<Option<String>>("User")?.flatten(),
            host_config,
        })
    }
}

fn parse_host_config(members: &Members) -> Result<HostConfig, DecodeError> {
    let mounts = match members.field::<Option<Vec<Members>>>("Mounts")?.flatten() {
        Some(entries) => Some(entries.iter().map(parse_mount).collect::<Result<Vec<_>, _>>()?),
        None => None,
    };
    Ok(HostConfig {
        binds: members.field::<Option<Vec<String>>>("Binds")?.flatten(),
        mounts,
        ..HostConfig::default()
    })
}

fn parse_mount(members: &Members) -> Result<Mount, DecodeError> {
    let typ = members
        .field::<Option<String>>("Type")?
        .flatten()
        .filter(|typ| typ.eq_ignore_ascii_case("bind"))
        .map(|_| MountTypeEnum::BIND);
    Ok(Mount {
        typ,
        source: members.field::<Option<String>>("Source")?.flatten(),
        ..Mount::default()
    })
}

/// Members of a JSON object in document order, duplicates kept.
struct Members(Vec<(String, Box<RawValue>)>);

impl Members {
    /// Decode the single member whose key folds to `name`.
    fn field<T: DeserializeOwned>(&self, name: &'static str) -> Result<Option<T>, DecodeError> {
        let mut found = None;
        for (key, value) in &self.0 {
            if key_folds_to(key, name) {
                if found.is_some() {
                    return Err(DecodeError::DuplicateKey(name));
                }
                found = Some(value);
            }
        }
        match found {
            Some(value) => Ok(Some(serde_json::from_str(value.get())?)),
            None => Ok(None),
        }
    }
}

impl<'de> Deserialize<'de> for Members {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MembersVisitor;

        impl<'de> Visitor<'de> for MembersVisitor {
            type Value = Members;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Members, A::Error> {
                let mut members = Vec::new();
                while let Some(entry) = map.next_entry::<String, Box<RawValue>>()? {
                    members.push(entry);
                }
                Ok(Members(members))
            }
        }

        deserializer.deserialize_map(MembersVisitor)
    }
}

/// Whether `key` names the ASCII field `name` under Unicode simple case
/// folding, so `hostconfig` and `Ho\u{17f}tConfig` both name `HostConfig`.
fn key_folds_to(key: &str, name: &str) -> bool {
    let mut chars = key.chars();
    for expected in name.chars() {
        match chars.next() {
            Some(c) if char_folds_to(c, expected) => {}
            _ => return false,
        }
    }
    chars.next().is_none()
}

fn char_folds_to(c: char, ascii: char) -> bool {
    if c.eq_ignore_ascii_case(&ascii) {
        return true;
    }
    let mut folded = c.to_uppercase().flat_map(char::to_lowercase);
    matches!(
        (folded.next(), folded.next()),
        (Some(f), None) if f == ascii.to_ascii_lowercase()
    )
}

/// Turn a plugin envelope into an [`AuthzRequest`].
///
/// Calls other than container creation, and calls without a body, yield a
/// request with no payload.
///
/// # Errors
///
/// Returns a [`DecodeError`] when a container-creation body cannot be decoded.
pub fn decode_request(
    request: &PluginRequest,
    user_source: UserSource,
) -> Result<AuthzRequest, DecodeError> {
    if !is_container_create(&request.request_method, &request.request_uri) {
        return Ok(AuthzRequest::not_applicable());
    }
    let body = match request.request_body.as_deref() {
        Some(body) if !body.is_empty() => body,
        _ => return Ok(AuthzRequest::not_applicable()),
    };

    let raw = base64::engine::general_purpose::STANDARD.decode(body)?;
    let create = CreateContainerBody::parse(&raw)?;

    let user = match user_source {
        UserSource::Container => create.user.unwrap_or_default(),
        UserSource::Authenticated => request.user.clone(),
    };

    Ok(AuthzRequest::mounts(
        user,
        bind_sources(create.host_config.as_ref()),
    ))
}

/// Whether the call is `POST /containers/create`, with or without an API
/// version prefix and query string.
pub fn is_container_create(method: &str, uri: &str) -> bool {
    if !method.eq_ignore_ascii_case("POST") {
        return false;
    }
    let path = uri.split_once('?').map_or(uri, |(path, _)| path);
    strip_api_version(path).trim_end_matches('/') == "/containers/create"
}

/// Strip a leading `/v1.43`-style segment.
fn strip_api_version(path: &str) -> &str {
    let Some(rest) = path.strip_prefix("/v") else {
        return path;
    };
    match rest.find('/') {
        Some(idx) => {
            let (version, tail) = rest.split_at(idx);
            let is_version = !version.is_empty()
                && version.chars().all(|c| c.is_ascii_digit() || c == '.');
            if is_version {
                tail
            } else {
                path
            }
        }
        None => path,
    }
}

/// Host source paths of every bind mount in `host_config`, in request order.
///
/// Legacy `Binds` entries (`src:dst[:opts]`) come first; entries whose source
/// is not an absolute path name a volume, not a host path, and are skipped.
/// Then the `Source` of every `Mounts` entry of type `bind`.
pub fn bind_sources(host_config: Option<&HostConfig>) -> Vec<String> {
    let Some(host_config) = host_config else {
        return Vec::new();
    };

    let binds = host_config
        .binds
        .iter()
        .flatten()
        .filter_map(|bind| bind.split(':').next())
        .filter(|source| source.starts_with('/'))
        .map(str::to_owned);

    let mounts = host_config
        .mounts
        .iter()
        .flatten()
        .filter(|mount| mount.typ == Some(MountTypeEnum::BIND))
        .filter_map(|mount| mount.source.clone());

    binds.chain(mounts).collect()
}
