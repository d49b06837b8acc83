//! Workload registry: identity → teardown capability.
//!
//! The registry is plain data; the [`Reaper`](crate::Reaper) wraps it in
//! a lock and keeps it in step with the liveness tracker. Every identity
//! claimed for teardown leaves a tombstone behind so it can never be
//! registered again.

use std::collections::{HashMap, HashSet};

use crate::teardown::TeardownHandle;

/// Live handles plus the tombstones of every identity ever claimed.
///
/// Tombstones are never evicted: the set grows by one string per reaped
/// workload for the life of the process. That is the price of refusing
/// every reuse of a reaped name; a bounded or expiring set would let an
/// old identity come back once its tombstone aged out. Provisioners are
/// expected to mint fresh identities, which keeps the growth proportional
/// to the number of deploys.
#[derive(Default)]
pub struct Registry {
    handles: HashMap<String, TeardownHandle>,
    reaped: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `handle` unless the identity is already registered.
    ///
    /// Returns `false` (dropping `handle`) when an earlier registration
    /// exists. The caller is expected to have checked [`is_reaped`](Self::is_reaped).
    pub fn insert_if_absent(&mut self, identity: &str, handle: TeardownHandle) -> bool {
        if self.handles.contains_key(identity) {
            return false;
        }
        self.handles.insert(identity.to_string(), handle);
        true
    }

    /// Remove the identity and take ownership of its teardown capability.
    ///
    /// Leaves a tombstone on success.
    pub fn claim(&mut self, identity: &str) -> Option<TeardownHandle> {
        let handle = self.handles.remove(identity)?;
        self.reaped.insert(identity.to_string());
        Some(handle)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.handles.contains_key(identity)
    }

    pub fn is_reaped(&self, identity: &str) -> bool {
        self.reaped.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Number of tombstoned identities.
    pub fn reaped_count(&self) -> usize {
        self.reaped.len()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("live", &self.handles.len())
            .field("reaped", &self.reaped.len())
            .finish()
    }
}
