use std::sync::Arc;
use thiserror::Error;

use crate::dispatch::promise::PromiseId;

/// Errors surfaced by the router, cluster and dispatch engine.
#[derive(Error, Debug, Clone)]
pub enum RouterError {
    #[error("router setup refused")]
    UnableToSetupRouter,

    #[error("no live shard available")]
    HostListExhausted,

    #[error("shard index is not a valid integer: {0}")]
    InvalidDbNum(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("retry budget exceeded after {attempts} attempt(s): {source}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        source: Box<RouterError>,
    },

    #[error("{} map-scope call(s) failed", .0.len())]
    CommandError(Vec<(PromiseId, RouterError)>),

    /// Declared by the backend as retryable (§4.1); triggers shard failover.
    #[error("retryable transport error: {0}")]
    Retryable(Arc<dyn std::error::Error + Send + Sync>),

    /// Propagated unchanged from the backend (§7); never triggers failover.
    #[error("backend error: {0}")]
    Backend(Arc<dyn std::error::Error + Send + Sync>),
}

impl RouterError {
    /// True for errors that should trigger shard failover rather than
    /// propagate to the caller unchanged (§4.1, §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, RouterError::Retryable(_))
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
