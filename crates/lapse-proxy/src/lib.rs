//! lapse-proxy: the public gateway in front of idle-reaped workloads.
//!
//! # Components
//!
//! - **`rewrite`**: maps `{prefix}/{identity}/{suffix}?{query}` onto the
//!   workload's internal address
//! - **`resolve`**: identity to address resolution (cluster DNS or a fixed table)
//! - **`gateway`**: the forwarding handler that extends workload liveness
//!   on every upstream response

pub mod gateway;
pub mod resolve;
pub mod rewrite;

pub use gateway::{Gateway, ProxyError, ProxyResult, proxy, router};
pub use resolve::{AddressResolver, ClusterDns, StaticResolver};
pub use rewrite::{GatewayPrefix, RewriteError, Target, rewrite, split_gateway_path};
