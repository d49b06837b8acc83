//! lapsed: the Lapse scale-to-zero control plane daemon.
//!
//! Assembles the reaper, the gateway and the admin API:
//! - `config`: defaults, `lapse.toml` and CLI/env layering
//! - `webhook`: provisioner that manages workloads over HTTP
//! - `daemon`: wiring and graceful shutdown

pub mod config;
pub mod daemon;
pub mod webhook;

pub use config::{FileConfig, LogFormat, ServeArgs, Settings};
pub use daemon::serve;
pub use webhook::{WebhookProvisioner, WebhookTeardown};
