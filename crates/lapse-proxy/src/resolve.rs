//! Workload identity → internal network address.

use std::collections::HashMap;
use std::sync::RwLock;

/// Maps a workload identity to the `host[:port]` authority of its backend.
pub trait AddressResolver: Send + Sync {
    /// `None` when the identity cannot be routed.
    fn resolve(&self, identity: &str) -> Option<String>;
}

/// Cluster service DNS: `{identity}.{namespace}.svc.cluster.local`.
///
/// Identities must be RFC 1035 labels so a request path can never steer
/// the upstream host outside the namespace.
#[derive(Debug, Clone)]
pub struct ClusterDns {
    namespace: String,
    port: Option<u16>,
}

impl ClusterDns {
    pub fn new(namespace: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            namespace: namespace.into(),
            port,
        }
    }
}

impl AddressResolver for ClusterDns {
    fn resolve(&self, identity: &str) -> Option<String> {
        if !is_dns_label(identity) {
            return None;
        }
        let host = format!("{identity}.{}.svc.cluster.local", self.namespace);
        Some(match self.port {
            Some(port) => format!("{host}:{port}"),
            None => host,
        })
    }
}

fn is_dns_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 {
        return false;
    }
    let inner_ok = bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-');
    let first_ok = bytes[0].is_ascii_lowercase();
    let last_ok = bytes[bytes.len() - 1] != b'-';
    inner_ok && first_ok && last_ok
}

/// Fixed identity → address table.
#[derive(Debug, Default)]
pub struct StaticResolver {
    routes: RwLock<HashMap<String, String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: impl Into<String>, authority: impl Into<String>) {
        self.routes
            .write()
            .expect("routes lock")
            .insert(identity.into(), authority.into());
    }

    pub fn remove(&self, identity: &str) -> Option<String> {
        self.routes.write().expect("routes lock").remove(identity)
    }
}

impl AddressResolver for StaticResolver {
    fn resolve(&self, identity: &str) -> Option<String> {
        self.routes.read().expect("routes lock").get(identity).cloned()
    }
}
