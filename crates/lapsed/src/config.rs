//! Daemon configuration.
//!
//! Three layers, later wins: built-in defaults, an optional `lapse.toml`,
//! then CLI flags and their environment variables.
//!
//! ```toml
//! port = 8080
//! gateway_prefix = "/gateway"
//! namespace = "faas"
//! public_url = "https://fn.example.com"
//! provisioner_url = "http://provisioner.faas.svc.cluster.local"
//!
//! [reaper]
//! poll_interval = "10s"
//! ttl = "30s"
//! teardown_timeout = "30s"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, ValueEnum};
use lapse_core::{ReaperConfig, parse_duration};
use lapse_proxy::GatewayPrefix;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Shape of `lapse.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub gateway_prefix: Option<String>,
    pub namespace: Option<String>,
    pub upstream_port: Option<u16>,
    pub public_url: Option<String>,
    pub provisioner_url: Option<String>,
    pub log_format: Option<LogFormat>,
    pub reaper: ReaperSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaperSection {
    pub poll_interval: Option<String>,
    pub ttl: Option<String>,
    pub teardown_timeout: Option<String>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Flags for `lapsed serve`. Each one can also come from the environment.
#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// Path to a TOML config file.
    #[arg(long, env = "LAPSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Path prefix the gateway is mounted under.
    #[arg(long, env = "GATEWAY_PATH_PREFIX")]
    pub gateway_prefix: Option<String>,

    /// Namespace workload services live in.
    #[arg(long, env = "K8S_NAMESPACE")]
    pub namespace: Option<String>,

    /// Port workload services listen on (default: 80).
    #[arg(long, env = "LAPSE_UPSTREAM_PORT")]
    pub upstream_port: Option<u16>,

    /// Externally reachable base URL used in deploy responses.
    #[arg(long, env = "LAPSE_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Base URL of the workload provisioner webhook.
    #[arg(long, env = "LAPSE_PROVISIONER_URL")]
    pub provisioner_url: Option<String>,

    /// How often the reaper sweeps, e.g. "10s".
    #[arg(long, env = "REAPER_POLL_EVERY")]
    pub poll_interval: Option<String>,

    /// Idle time after which a workload is reaped, e.g. "30s".
    #[arg(long, env = "REAPER_TIME_TO_LIVE")]
    pub ttl: Option<String>,

    /// Upper bound on a single teardown call.
    #[arg(long, env = "LAPSE_TEARDOWN_TIMEOUT")]
    pub teardown_timeout: Option<String>,

    /// Log output format.
    #[arg(long, env = "LAPSE_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

/// Fully resolved and validated daemon settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub port: u16,
    pub gateway_prefix: GatewayPrefix,
    pub namespace: String,
    pub upstream_port: Option<u16>,
    pub public_url: String,
    pub provisioner_url: String,
    pub reaper: ReaperConfig,
    pub log_format: LogFormat,
}

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_PREFIX: &str = "/gateway";
const DEFAULT_NAMESPACE: &str = "faas";
const RESERVED_PREFIXES: [&str; 2] = ["/admin", "/health"];

impl Settings {
    /// Load the config file named by `args` (if any) and merge.
    pub fn load(args: &ServeArgs) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(args, file)
    }

    pub fn resolve(args: &ServeArgs, file: FileConfig) -> anyhow::Result<Self> {
        let port = args.port.or(file.port).unwrap_or(DEFAULT_PORT);

        let prefix = args
            .gateway_prefix
            .clone()
            .or(file.gateway_prefix)
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        let gateway_prefix = GatewayPrefix::new(&prefix)?;
        if RESERVED_PREFIXES
            .iter()
            .any(|reserved| prefix == *reserved || prefix.starts_with(&format!("{reserved}/")))
        {
            anyhow::bail!("gateway prefix {prefix:?} collides with a built-in route");
        }

        let namespace = args
            .namespace
            .clone()
            .or(file.namespace)
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        if namespace.is_empty() {
            anyhow::bail!("namespace must not be empty");
        }

        let public_url = args
            .public_url
            .clone()
            .or(file.public_url)
            .unwrap_or_else(|| format!("http://localhost:{port}"));
        let public_url = public_url.trim_end_matches('/').to_string();

        let provisioner_url = args
            .provisioner_url
            .clone()
            .or(file.provisioner_url)
            .context("provisioner_url is required (--provisioner-url or LAPSE_PROVISIONER_URL)")?;
        let provisioner_url = provisioner_url.trim_end_matches('/').to_string();
        if !provisioner_url.starts_with("http://") {
            anyhow::bail!("provisioner_url must be an http:// URL, got {provisioner_url:?}");
        }

        let defaults = ReaperConfig::default();
        let duration = |flag: &Option<String>, from_file: Option<String>, default: Duration| {
            match flag.clone().or(from_file) {
                Some(s) => parse_duration(&s),
                None => Ok(default),
            }
        };
        let reaper = ReaperConfig {
            poll_interval: duration(&args.poll_interval, file.reaper.poll_interval, defaults.poll_interval)?,
            ttl: duration(&args.ttl, file.reaper.ttl, defaults.ttl)?,
            teardown_timeout: duration(
                &args.teardown_timeout,
                file.reaper.teardown_timeout,
                defaults.teardown_timeout,
            )?,
        };
        reaper.validate().context("invalid reaper settings")?;

        Ok(Self {
            port,
            gateway_prefix,
            namespace,
            upstream_port: args.upstream_port.or(file.upstream_port),
            public_url,
            provisioner_url,
            reaper,
            log_format: args.log_format.or(file.log_format).unwrap_or_default(),
        })
    }
}
