//! Gateway path rewriting.
//!
//! ```text
//! Incoming: {prefix}/{identity}/{suffix}?{query}
//! Outgoing: http://{resolved address}/{suffix}?{query}
//! ```
//!
//! The query string is carried over byte for byte.

use http::Uri;
use http::uri::{Authority, PathAndQuery, Scheme};
use thiserror::Error;

use crate::resolve::AddressResolver;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewriteError {
    #[error("gateway prefix must start with '/' and must not end with '/': {0:?}")]
    InvalidPrefix(String),

    #[error("path is not under the gateway prefix: {0}")]
    NotGatewayPath(String),

    #[error("missing workload identity in path: {0}")]
    MissingIdentity(String),

    #[error("workload cannot be routed: {0}")]
    Unroutable(String),

    #[error("invalid upstream uri: {0}")]
    InvalidUri(String),
}

/// Validated path prefix the gateway is mounted under, e.g. `/gateway`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPrefix(String);

impl GatewayPrefix {
    pub fn new(prefix: &str) -> Result<Self, RewriteError> {
        if !prefix.starts_with('/') || prefix.ends_with('/') {
            return Err(RewriteError::InvalidPrefix(prefix.to_string()));
        }
        Ok(Self(prefix.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Public path of a workload behind this prefix.
    pub fn workload_path(&self, identity: &str) -> String {
        format!("{}/{identity}", self.0)
    }
}

/// Split an inbound path into `(identity, suffix)`.
///
/// The suffix keeps its leading slash; an empty suffix becomes `/`.
pub fn split_gateway_path<'a>(
    prefix: &GatewayPrefix,
    path: &'a str,
) -> Result<(&'a str, &'a str), RewriteError> {
    let rest = path
        .strip_prefix(prefix.as_str())
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| RewriteError::NotGatewayPath(path.to_string()))?;

    let (identity, suffix) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, "/"),
    };

    if identity.is_empty() {
        return Err(RewriteError::MissingIdentity(path.to_string()));
    }
    Ok((identity, suffix))
}

/// A rewritten request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub identity: String,
    pub uri: Uri,
}

impl Target {
    pub fn authority(&self) -> Option<&Authority> {
        self.uri.authority()
    }
}

/// Rewrite an inbound gateway URI to the workload's internal address.
pub fn rewrite(
    prefix: &GatewayPrefix,
    inbound: &Uri,
    resolver: &dyn AddressResolver,
) -> Result<Target, RewriteError> {
    let (identity, suffix) = split_gateway_path(prefix, inbound.path())?;

    let authority = resolver
        .resolve(identity)
        .ok_or_else(|| RewriteError::Unroutable(identity.to_string()))?;
    let authority: Authority = authority
        .parse()
        .map_err(|e: http::uri::InvalidUri| RewriteError::InvalidUri(e.to_string()))?;

    let path_and_query = match inbound.query() {
        Some(query) => format!("{suffix}?{query}"),
        None => suffix.to_string(),
    };
    let path_and_query: PathAndQuery = path_and_query
        .parse()
        .map_err(|e: http::uri::InvalidUri| RewriteError::InvalidUri(e.to_string()))?;

    let uri = Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| RewriteError::InvalidUri(e.to_string()))?;

    Ok(Target {
        identity: identity.to_string(),
        uri,
    })
}
