//! Reverse-proxy gateway in front of scale-to-zero workloads.
//!
//! Every request under the gateway prefix is rewritten to its workload's
//! internal address and forwarded. Once the backend answers, with any
//! status, the workload's liveness is extended. Requests that never
//! produce a backend response leave liveness untouched.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use lapse_core::Reaper;
use thiserror::Error;
use tracing::{debug, warn};

use crate::resolve::AddressResolver;
use crate::rewrite::{GatewayPrefix, RewriteError, rewrite};

/// Headers that apply to a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error("unknown workload: {0}")]
    UnknownWorkload(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Rewrite(RewriteError::MissingIdentity(_)) => StatusCode::BAD_REQUEST,
            ProxyError::Rewrite(RewriteError::NotGatewayPath(_))
            | ProxyError::Rewrite(RewriteError::Unroutable(_))
            | ProxyError::UnknownWorkload(_) => StatusCode::NOT_FOUND,
            ProxyError::Rewrite(_) | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = match self.status() {
            StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
                "service temporarily unavailable".to_string()
            }
            _ => self.to_string(),
        };
        (self.status(), body).into_response()
    }
}

/// Forwards gateway traffic and reports liveness to the reaper.
pub struct Gateway {
    prefix: GatewayPrefix,
    resolver: Arc<dyn AddressResolver>,
    reaper: Arc<Reaper>,
    client: Client<HttpConnector, Body>,
    upstream_timeout: Duration,
}

impl Gateway {
    pub fn new(prefix: GatewayPrefix, resolver: Arc<dyn AddressResolver>, reaper: Arc<Reaper>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(30)));
        connector.set_keepalive(Some(Duration::from_secs(30)));

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(120))
            .pool_max_idle_per_host(10)
            .build(connector);

        Self {
            prefix,
            resolver,
            reaper,
            client,
            upstream_timeout: Duration::from_secs(60),
        }
    }

    /// Bound on how long to wait for upstream response headers.
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn prefix(&self) -> &GatewayPrefix {
        &self.prefix
    }

    /// Forward one request to its workload.
    pub async fn forward(&self, mut req: Request) -> ProxyResult<Response> {
        let target = rewrite(&self.prefix, req.uri(), self.resolver.as_ref())?;
        let identity = target.identity.clone();

        if !self.reaper.is_registered(&identity) {
            debug!(%identity, "request for unregistered workload");
            return Err(ProxyError::UnknownWorkload(identity));
        }

        let host = target
            .authority()
            .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok());
        strip_hop_by_hop(req.headers_mut());
        if let Some(host) = host {
            req.headers_mut().insert(header::HOST, host);
        }
        debug!(%identity, upstream = %target.uri, method = %req.method(), "forwarding");
        *req.uri_mut() = target.uri;

        let response = match tokio::time::timeout(self.upstream_timeout, self.client.request(req)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(%identity, error = %e, "upstream request failed");
                return Err(ProxyError::Upstream(e.to_string()));
            }
            Err(_) => {
                warn!(%identity, timeout_ms = self.upstream_timeout.as_millis() as u64, "upstream timed out");
                return Err(ProxyError::Timeout(self.upstream_timeout));
            }
        };

        // Backend answered: the workload is in use, whatever the status.
        self.reaper.touch(&identity);

        let (mut parts, body) = response.into_parts();
        debug!(%identity, status = %parts.status, "upstream responded");
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("prefix", &self.prefix)
            .field("upstream_timeout", &self.upstream_timeout)
            .finish_non_exhaustive()
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers listed in `Connection` are hop-by-hop too.
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// axum handler: forward or map the failure to a plain-text error.
pub async fn proxy(State(gateway): State<Arc<Gateway>>, req: Request) -> Response {
    match gateway.forward(req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Router that sends every otherwise-unmatched request through the gateway.
///
/// The gateway sees the full request path, so merge this router instead
/// of nesting it.
pub fn router(gateway: Arc<Gateway>) -> axum::Router {
    axum::Router::new().fallback(proxy).with_state(gateway)
}
