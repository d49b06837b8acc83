//! lapse-core: the scale-to-zero reaping core.
//!
//! Keeps on-demand workloads alive exactly as long as they see traffic.
//!
//! # Components
//!
//! - **`tracker`**: min-heap of last-activity times with an identity index
//! - **`registry`**: identity → teardown capability, with tombstones
//! - **`reaper`**: register / touch / sweep, plus the periodic sweep loop
//! - **`teardown`**: the provisioner and teardown capability traits
//!
//! # Lifecycle
//!
//! ```text
//! Unregistered ──register──▶ Live ──touch──▶ Live
//!                             │
//!                    idle > TTL, sweep
//!                             ▼
//!                          Reaping ──teardown ok / failed──▶ Gone
//! ```
//!
//! Nothing leaves `Gone`: a reaped identity can't be touched, swept or
//! registered again.

pub mod config;
pub mod error;
pub mod reaper;
pub mod registry;
pub mod teardown;
pub mod tracker;

pub use config::{ReaperConfig, parse_duration};
pub use error::{ConfigError, ProvisionError, ReaperError, ReaperResult, Rejected, TeardownError};
pub use reaper::{Reaper, Registration, SweepStats, WorkloadStatus};
pub use registry::Registry;
pub use teardown::{
    BoxFuture, DeployOption, DeployRequest, Deployment, Provisioner, Teardown, TeardownHandle,
};
pub use tracker::LivenessTracker;
