//! lapse-api: HTTP surface of the control plane.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/health` | Liveness probe, returns `ok` |
//! | POST | `/admin/deploy` | Provision a workload and register it with the reaper |
//! | GET | `/admin/workloads` | Registered workloads with idle time |
//! | ANY | `{prefix}/{identity}/*` | Forwarded to the workload by the gateway |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use lapse_core::{Provisioner, Reaper};
use lapse_proxy::Gateway;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct ApiState {
    pub reaper: Arc<Reaper>,
    pub provisioner: Arc<dyn Provisioner>,
    pub gateway: Arc<Gateway>,
    /// Externally reachable base URL, e.g. `https://fn.example.com`.
    pub public_url: String,
}

impl ApiState {
    /// Public URL of a deployed workload.
    pub fn workload_url(&self, identity: &str) -> String {
        format!(
            "{}{}",
            self.public_url.trim_end_matches('/'),
            self.gateway.prefix().workload_path(identity)
        )
    }
}

/// Build the complete router: health, admin routes and the gateway.
pub fn build_router(state: ApiState) -> Router {
    let gateway = Arc::clone(&state.gateway);

    let admin_routes = Router::new()
        .route("/deploy", post(handlers::deploy))
        .route("/workloads", get(handlers::list_workloads))
        .with_state(state);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/admin", admin_routes)
        .merge(lapse_proxy::router(gateway))
}
