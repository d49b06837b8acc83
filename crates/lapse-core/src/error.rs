//! Error types for the reaping core and its collaborators.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::teardown::TeardownHandle;

/// Result of [`Reaper::register`](crate::Reaper::register).
pub type ReaperResult<T> = Result<T, Rejected>;

/// Errors surfaced synchronously by [`Reaper`](crate::Reaper) operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReaperError {
    /// The identity was already reaped and can never come back.
    #[error("workload already reaped: {0}")]
    Reaped(String),
}

/// A registration the reaper refused.
///
/// The offered handle comes back with the reason: the registry never
/// took ownership, so releasing the resources it names is up to the
/// caller (see [`Reaper::release`](crate::Reaper::release)).
#[derive(Error)]
#[error("{reason}")]
pub struct Rejected {
    pub reason: ReaperError,
    pub handle: TeardownHandle,
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Errors returned by a [`Teardown`](crate::Teardown) capability.
#[derive(Debug, Error)]
pub enum TeardownError {
    #[error("teardown timed out after {0:?}")]
    TimedOut(Duration),

    #[error("teardown request failed: {0}")]
    Request(String),

    #[error("teardown rejected with status {0}")]
    Status(u16),
}

/// Errors returned by a [`Provisioner`](crate::Provisioner) while deploying.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid deploy request: {0}")]
    InvalidRequest(String),

    #[error("provisioner request failed: {0}")]
    Request(String),

    #[error("provisioner did not answer within {0:?}")]
    TimedOut(Duration),

    #[error("provisioner rejected deploy with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed provisioner response: {0}")]
    Response(String),
}

/// Errors produced while parsing or validating configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("{0} must be a positive duration")]
    ZeroDuration(&'static str),

    #[error("invalid config: {0}")]
    Invalid(String),
}
