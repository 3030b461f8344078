//! Shared, atomically replaced policy snapshot.
//!
//! Readers take an `Arc` to the current [`PolicySet`] with a single atomic
//! load and never block. The watcher builds a complete new set off to the side
//! and publishes it with one pointer swap, so a reader holds either the old set
//! or the new one in full. Requests already in flight keep deciding against the
//! set they loaded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

use super::PolicySet;

/// Owner of the committed policy set.
///
/// The only mutation is a wholesale [`replace`](Self::replace). Intended for a
/// single writer (startup, then the watcher thread) and many readers.
pub struct PolicyStore {
    current: ArcSwap<PolicySet>,
    generation: AtomicU64,
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.load();
        f.debug_struct("PolicyStore")
            .field("generation", &current.generation())
            .field("policy_count", &current.len())
            .finish()
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyStore {
    /// Create an empty store (generation 0).
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(PolicySet::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Create a store already holding `initial` as generation 1.
    pub fn with_policies(initial: PolicySet) -> Self {
        let store = Self::new();
        store.replace(initial);
        store
    }

    /// The currently committed policy set.
    pub fn snapshot(&self) -> Arc<PolicySet> {
        self.current.load_full()
    }

    /// Atomically publish `policies` as the committed set.
    ///
    /// Returns the generation assigned to the new snapshot.
    pub fn replace(&self, policies: PolicySet) -> u64 {
        let generation = self
            .generation
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);
        let count = policies.len();
        self.current
            .store(Arc::new(policies.with_generation(generation)));
        info!(generation, count, "policy set replaced");
        generation
    }
}
