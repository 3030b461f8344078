//! Authorization decisions for intercepted container-creation requests.
//!
//! [`AuthorizationCore`] ties the policy pieces together: it reads one policy
//! snapshot, matches the acting user, validates the requested bind sources,
//! and turns the outcome into an allow/deny [`Decision`]. Validation failures
//! are ordinary deny decisions, never errors.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::policy::{match_user, validate, PolicySet, PolicyStore, ValidationResult};

// ---------------------------------------------------------------------------
// Request and decision
// ---------------------------------------------------------------------------

/// The parts of a container-creation call that policies govern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// User the request is attributed to.
    pub acting_user: String,
    /// Host source paths of every requested bind mount, in request order.
    pub requested_binds: Vec<String>,
}

/// A decoded intercepted API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthzRequest {
    /// Present only for container-creation calls.
    pub payload: Option<MountRequest>,
}

impl AuthzRequest {
    /// A call the policies do not apply to.
    pub fn not_applicable() -> Self {
        Self { payload: None }
    }

    /// A container-creation call by `user` requesting `binds`.
    pub fn mounts(user: impl Into<String>, binds: Vec<String>) -> Self {
        Self {
            payload: Some(MountRequest {
                acting_user: user.into(),
                requested_binds: binds,
            }),
        }
    }
}

/// Verdict returned to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the call may proceed.
    pub allow: bool,
    /// Human-readable explanation, present only on deny.
    pub reason: Option<String>,
    /// The first rejected bind source, present only on a mount denial.
    pub offending_path: Option<String>,
}

impl Decision {
    /// An allow decision.
    pub fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
            offending_path: None,
        }
    }

    /// A deny decision with a reason and no specific path.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: Some(reason.into()),
            offending_path: None,
        }
    }

    /// A deny decision naming `user` and the bind source it may not mount.
    pub fn illegal_mount(user: &str, offending_path: impl Into<String>) -> Self {
        let offending_path = offending_path.into();
        Self {
            allow: false,
            reason: Some(format!(
                "user '{user}' is not allowed to bind-mount '{offending_path}'"
            )),
            offending_path: Some(offending_path),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthorizationCore
// ---------------------------------------------------------------------------

/// Decides intercepted requests against the live policy store.
///
/// Never mutates the store. Each decision reads exactly one snapshot, so a
/// concurrent reload cannot change the policy set halfway through a decision;
/// a request that started before a reload commits is decided under the old set.
#[derive(Debug, Clone)]
pub struct AuthorizationCore {
    store: Arc<PolicyStore>,
}

impl AuthorizationCore {
    /// Create a core reading from `store`.
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    /// The store decisions are read from.
    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    /// Decide `request` against the current policy snapshot.
    pub fn decide(&self, request: &AuthzRequest) -> Decision {
        decide_against(&self.store.snapshot(), request)
    }
}

/// Decide `request` against a fixed policy set.
///
/// Requests without a mount payload are allowed unconditionally.
pub fn decide_against(policies: &PolicySet, request: &AuthzRequest) -> Decision {
    let Some(payload) = &request.payload else {
        debug!("request carries no mount payload; allowing");
        return Decision::allow();
    };

    let user = payload.acting_user.as_str();
    let policy = match_user(policies.records(), user);

    match validate(&payload.requested_binds, &policy.allowed_prefixes) {
        ValidationResult::Pass => {
            debug!(
                user,
                mounts = payload.requested_binds.len(),
                generation = policies.generation(),
                "mount request allowed"
            );
            Decision::allow()
        }
        ValidationResult::Fail { offending_path } => {
            warn!(
                user,
                offending_path = %offending_path,
                generation = policies.generation(),
                "mount request denied"
            );
            Decision::illegal_mount(user, offending_path)
        }
    }
}
