//! Capabilities supplied by the workload provisioner.
//!
//! The core never talks to an orchestrator itself. A [`Provisioner`]
//! creates backing resources and hands back a [`Deployment`]: the
//! workload identity plus a [`Teardown`] capability that knows how to
//! remove exactly those resources.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, TeardownError};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Removes the backing resources of one workload.
///
/// Implementations should be idempotent: removing resources that are
/// already gone is a success.
pub trait Teardown: Send + Sync {
    fn teardown(&self) -> BoxFuture<'_, Result<(), TeardownError>>;
}

/// Owned teardown capability, as stored in the registry.
pub type TeardownHandle = Box<dyn Teardown>;

/// Creates workload resources on some backend.
pub trait Provisioner: Send + Sync {
    fn deploy(&self, request: DeployRequest) -> BoxFuture<'_, Result<Deployment, ProvisionError>>;
}

/// Result of a successful deploy.
pub struct Deployment {
    pub identity: String,
    pub handle: TeardownHandle,
}

impl std::fmt::Debug for Deployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployment")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Payload accepted by the admin deploy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Base64-encoded function source.
    pub script: String,
    /// Base64-encoded dotenv file.
    #[serde(default, alias = "dotFile", skip_serializing_if = "Option::is_none")]
    pub dot_file: Option<String>,
    #[serde(default)]
    pub option: DeployOption,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica: Option<u32>,
}

impl DeployRequest {
    /// Reject payloads the control plane cannot honour.
    ///
    /// Workloads run with zero or one replica.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.script.trim().is_empty() {
            return Err(ProvisionError::InvalidRequest("script is empty".to_string()));
        }
        if let Some(replica) = self.option.replica
            && replica > 1
        {
            return Err(ProvisionError::InvalidRequest(format!(
                "replica must be 0 or 1, got {replica}"
            )));
        }
        Ok(())
    }
}
