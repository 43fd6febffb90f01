//! The backend contract (§4.1, §6.1) every driver satisfies.
//!
//! Mirrors `nydus.db.backends.base.BaseConnection`/`BasePipeline`: a driver
//! lazily establishes its transport, declares which error kinds are
//! retryable, and optionally hands out a native pipeline/batch object.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::value::{KwArgs, Value};

/// An error raised by a backend call.
///
/// `retryable` mirrors the source's `retryable_exceptions` set (§3, §4.1):
/// when true, the cluster's retry loop (§4.3) fails the shard over to an
/// alternate one rather than propagating the error to the caller.
#[derive(Debug, Clone)]
pub struct BackendError {
    retryable: bool,
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl BackendError {
    /// A transport-level fault: the shard is probably bad, try another (§7).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
            source: None,
        }
    }

    /// An application-level error: propagate unchanged, shard stays healthy (§7).
    pub fn application(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BackendError {}

/// A per-shard batch object (§3 Pipeline). `execute` is called at most once;
/// the returned map MUST cover every queued call id.
#[async_trait]
pub trait Pipeline: Send {
    /// Queue a call in backend-native form, keyed by the caller's call id
    /// (the dispatch engine uses the originating promise's id, §4.4).
    fn add(&mut self, call_id: u64, op: &str, args: Vec<Value>, kwargs: KwArgs);

    /// Execute every queued call in a single round-trip. An `Err` here is a
    /// pipeline-level (atomic) failure: the caller applies the same error to
    /// every queued call id (§7).
    async fn execute(
        &mut self,
    ) -> Result<BTreeMap<u64, Result<Value, BackendError>>, BackendError>;
}

/// Every backend driver (§4.1).
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Per-host configuration this driver is constructed from (§6.2).
    type HostConfig: Clone + Send + Sync;

    /// Construct a backend instance bound to shard `num` from its host config.
    fn from_host_config(num: u32, config: Self::HostConfig) -> Self
    where
        Self: Sized;

    /// Merge per-host config over cluster-wide `defaults` (host values win),
    /// mirroring `nydus.utils.apply_defaults`. The default implementation
    /// ignores `defaults`; drivers with layered config override this.
    fn merge_host_config(host: Self::HostConfig, _defaults: &Self::HostConfig) -> Self::HostConfig
    where
        Self: Sized,
    {
        host
    }

    /// Stable, opaque identifier used by the consistent-hash ring (§4.2).
    /// Conventionally `"host:port"` for wire-compatible backends (§6.3).
    fn identifier(&self) -> &str;

    /// Establish the transport. Drivers MUST memoize this internally so
    /// that subsequent calls reuse the connection (§4.1's lazy connection).
    async fn connect(&self) -> Result<(), BackendError>;

    /// Tear down the transport; the next call reconnects.
    async fn disconnect(&self);

    /// If true, `pipeline()` MUST return `Some`.
    fn supports_pipelines(&self) -> bool {
        false
    }

    /// Invoke `op` with the given arguments against this shard's transport.
    async fn call(&self, op: &str, args: &[Value], kwargs: &KwArgs) -> Result<Value, BackendError>;

    /// A fresh batch object bound to this backend, if supported.
    fn pipeline(&self) -> Option<Box<dyn Pipeline>> {
        None
    }
}
