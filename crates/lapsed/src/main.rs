//! lapsed: keeps on-demand workloads alive while they see traffic and
//! tears them down once idle.
//!
//! # Usage
//!
//! ```text
//! lapsed serve --provisioner-url http://provisioner:8000 --ttl 30s
//! lapsed serve --config /etc/lapse/lapse.toml
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lapse_proxy::ClusterDns;
use lapsed::{LogFormat, ServeArgs, Settings, WebhookProvisioner};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lapsed", about = "Lapse scale-to-zero control plane", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway, admin API and reaper.
    Serve(ServeArgs),
    /// Resolve and validate configuration, then print it.
    CheckConfig(ServeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            let settings = Settings::load(&args)?;
            init_tracing(settings.log_format);
            run(settings).await
        }
        Command::CheckConfig(args) => {
            let settings = Settings::load(&args)?;
            println!("{settings:#?}");
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lapsed=debug,lapse=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    info!(
        poll = ?settings.reaper.poll_interval,
        ttl = ?settings.reaper.ttl,
        namespace = %settings.namespace,
        "lapsed starting"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let provisioner = Arc::new(WebhookProvisioner::new(&settings.provisioner_url));
    let resolver = Arc::new(ClusterDns::new(settings.namespace.clone(), settings.upstream_port));

    lapsed::serve(settings, listener, provisioner, resolver, shutdown_signal()).await
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
