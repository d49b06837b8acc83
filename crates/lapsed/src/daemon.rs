//! Daemon assembly: reaper loop, gateway and admin API on one listener.
//!
//! In this mode, the daemon:
//! 1. Builds the reaper from the resolved settings
//! 2. Starts the periodic sweep loop in the background
//! 3. Serves the admin API and the gateway until the shutdown future fires
//! 4. Stops the sweep loop and waits for its final sweep

use std::future::Future;
use std::sync::Arc;

use lapse_api::{ApiState, build_router};
use lapse_core::{Provisioner, Reaper};
use lapse_proxy::{AddressResolver, Gateway};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Settings;

/// Run the control plane on `listener` until `shutdown` completes.
pub async fn serve<F>(
    settings: Settings,
    listener: TcpListener,
    provisioner: Arc<dyn Provisioner>,
    resolver: Arc<dyn AddressResolver>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    // ── Reaper ───────────────────────────────────────────────────
    let reaper = Arc::new(Reaper::new(settings.reaper));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reaper_task = {
        let reaper = Arc::clone(&reaper);
        tokio::spawn(async move {
            reaper.run(shutdown_rx).await;
        })
    };

    // ── HTTP surface ─────────────────────────────────────────────
    let gateway = Gateway::new(settings.gateway_prefix.clone(), resolver, Arc::clone(&reaper));
    let state = ApiState {
        reaper: Arc::clone(&reaper),
        provisioner,
        gateway: Arc::new(gateway),
        public_url: settings.public_url.clone(),
    };
    let router = build_router(state);

    let addr = listener.local_addr()?;
    info!(
        %addr,
        prefix = settings.gateway_prefix.as_str(),
        public_url = %settings.public_url,
        "control plane listening"
    );

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutdown signal received");
        })
        .await;

    // Stop the sweep loop even when the server failed.
    let _ = shutdown_tx.send(true);
    if let Err(e) = reaper_task.await {
        error!(error = %e, "reaper task panicked");
    }

    result?;
    info!("lapsed stopped");
    Ok(())
}
