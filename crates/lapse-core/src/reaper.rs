//! Reaper: registers workloads, extends their liveness, and tears down
//! the idle ones.
//!
//! Lock order is registry → tracker. Registration and the sweep claim
//! both mutate the two structures inside one registry write section,
//! so an identity is in the registry exactly when it is in the tracker.
//! Teardown calls run after every lock has been released.

use std::sync::RwLock;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ReaperConfig;
use crate::error::{ReaperError, ReaperResult, Rejected, TeardownError};
use crate::registry::Registry;
use crate::teardown::TeardownHandle;
use crate::tracker::LivenessTracker;

/// Outcome of a [`Reaper::register`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The identity was new; its handle is now owned by the registry.
    Inserted,
    /// The identity was already live; only its liveness was refreshed
    /// and the offered handle was dropped.
    Refreshed,
}

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Identities claimed by this sweep, oldest first.
    pub expired: Vec<String>,
    pub torn_down: u32,
    pub failed: u32,
    /// Expired tracker records with no registry entry.
    pub unknown: u32,
}

/// A live workload and how long it has been idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub identity: String,
    pub idle: Duration,
}

/// Owns the registry and liveness tracker and drives reaping.
///
/// Construct once and share behind an `Arc`.
#[derive(Debug)]
pub struct Reaper {
    registry: RwLock<Registry>,
    tracker: LivenessTracker,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(config: ReaperConfig) -> Self {
        Self {
            registry: RwLock::new(Registry::new()),
            tracker: LivenessTracker::new(),
            config,
        }
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    /// Bind `identity` to its teardown capability and mark it live.
    ///
    /// The first registration wins; later calls for a live identity only
    /// refresh its liveness. Registering an identity that has already
    /// been reaped fails and hands `handle` back untouched, so the caller
    /// can [`release`](Self::release) it.
    pub fn register(&self, identity: &str, handle: TeardownHandle) -> ReaperResult<Registration> {
        let mut registry = self.registry.write().expect("registry lock");
        if registry.is_reaped(identity) {
            warn!(%identity, "refusing to register reaped workload");
            return Err(Rejected {
                reason: ReaperError::Reaped(identity.to_string()),
                handle,
            });
        }

        let outcome = if registry.insert_if_absent(identity, handle) {
            Registration::Inserted
        } else {
            Registration::Refreshed
        };
        self.tracker.touch(identity);
        drop(registry);

        match outcome {
            Registration::Inserted => info!(%identity, "workload registered"),
            Registration::Refreshed => debug!(%identity, "workload already registered, liveness refreshed"),
        }
        Ok(outcome)
    }

    /// Extend the liveness of a registered workload.
    ///
    /// Returns `false` without touching anything when the identity is
    /// not registered (not yet registered, or already reaped).
    pub fn touch(&self, identity: &str) -> bool {
        let registry = self.registry.read().expect("registry lock");
        if !registry.contains(identity) {
            debug!(%identity, "touch for unknown workload ignored");
            return false;
        }
        self.tracker.touch(identity);
        true
    }

    pub fn is_registered(&self, identity: &str) -> bool {
        self.registry.read().expect("registry lock").contains(identity)
    }

    /// Whether `identity` has been torn down (or attempted).
    pub fn is_reaped(&self, identity: &str) -> bool {
        self.registry.read().expect("registry lock").is_reaped(identity)
    }

    pub fn live_count(&self) -> usize {
        self.registry.read().expect("registry lock").len()
    }

    /// Registered workloads with their idle time, longest idle first.
    pub fn workloads(&self) -> Vec<WorkloadStatus> {
        let now = Instant::now();
        let _registry = self.registry.read().expect("registry lock");
        self.tracker
            .snapshot()
            .into_iter()
            .map(|(identity, last_touch)| WorkloadStatus {
                identity,
                idle: now.saturating_duration_since(last_touch),
            })
            .collect()
    }

    /// Run one sweep as of the current instant.
    pub async fn sweep(&self) -> SweepStats {
        self.sweep_at(Instant::now()).await
    }

    /// Claim every workload idle past the TTL as of `now`, then tear
    /// each one down.
    ///
    /// A failed teardown is logged and dropped: the identity stays gone.
    pub async fn sweep_at(&self, now: Instant) -> SweepStats {
        let mut stats = SweepStats::default();

        let claimed: Vec<(String, TeardownHandle)> = {
            let mut registry = self.registry.write().expect("registry lock");
            let expired = self.tracker.expire_batch(now, self.config.ttl);
            expired
                .into_iter()
                .filter_map(|identity| match registry.claim(&identity) {
                    Some(handle) => Some((identity, handle)),
                    None => {
                        warn!(%identity, "expired workload missing from registry");
                        stats.unknown += 1;
                        None
                    }
                })
                .collect()
        };

        if claimed.is_empty() {
            debug!("sweep found no idle workloads");
            return stats;
        }

        info!(count = claimed.len(), "reaping idle workloads");

        for (identity, handle) in claimed {
            match self.teardown(&handle).await {
                Ok(()) => {
                    info!(%identity, "workload torn down");
                    stats.torn_down += 1;
                }
                Err(e) => {
                    // No retry: the workload's resources may leak.
                    error!(%identity, error = %e, "teardown failed, dropping workload");
                    stats.failed += 1;
                }
            }
            stats.expired.push(identity);
        }

        stats
    }

    /// Tear down a handle the registry never owned, such as one returned
    /// by a rejected [`register`](Self::register). Bounded by the same
    /// timeout as a sweep.
    pub async fn release(&self, identity: &str, handle: TeardownHandle) -> Result<(), TeardownError> {
        let result = self.teardown(&handle).await;
        match &result {
            Ok(()) => info!(%identity, "unregistered workload torn down"),
            Err(e) => error!(%identity, error = %e, "teardown of unregistered workload failed"),
        }
        result
    }

    async fn teardown(&self, handle: &TeardownHandle) -> Result<(), TeardownError> {
        let timeout = self.config.teardown_timeout;
        match tokio::time::timeout(timeout, handle.teardown()).await {
            Ok(result) => result,
            Err(_) => Err(TeardownError::TimedOut(timeout)),
        }
    }

    /// Sweep once per poll interval until `shutdown` fires, then sweep
    /// one final time before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let poll = self.config.poll_interval;
        info!(
            poll_ms = poll.as_millis() as u64,
            ttl_ms = self.config.ttl.as_millis() as u64,
            "reaper started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + poll, poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let already_stopped = *shutdown.borrow_and_update();
        if !already_stopped {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                    _ = shutdown.changed() => {
                        break;
                    }
                }
            }
        }

        info!("reaper shutting down, running final sweep");
        let stats = self.sweep().await;
        info!(
            torn_down = stats.torn_down,
            failed = stats.failed,
            remaining = self.live_count(),
            "reaper stopped"
        );
    }
}
