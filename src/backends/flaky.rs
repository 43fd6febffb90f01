//! A backend wrapper that fails the first `N` calls with a retryable error,
//! then delegates to the wrapped backend (§8 property 7's "ScumbagConnection";
//! §10). Used by the retry-loop and failover test suite.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::backend::{Backend, BackendError, Pipeline};
use crate::value::{KwArgs, Value};

#[derive(Debug, Clone)]
pub struct FlakyHostConfig<C> {
    pub inner: C,
    pub fail_first: u32,
}

#[derive(Debug)]
pub struct FlakyBackend<B: Backend> {
    inner: B,
    remaining_failures: AtomicU32,
    calls_made: AtomicU32,
}

impl<B: Backend> FlakyBackend<B> {
    pub fn new(inner: B, fail_first: u32) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(fail_first),
            calls_made: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Total number of `call` invocations so far, used by the retry-budget
    /// test suite to assert the exact attempt count (§8 property 7).
    pub fn calls_made(&self) -> u32 {
        self.calls_made.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<B: Backend> Backend for FlakyBackend<B> {
    type HostConfig = FlakyHostConfig<B::HostConfig>;

    fn from_host_config(num: u32, config: Self::HostConfig) -> Self {
        Self::new(B::from_host_config(num, config.inner), config.fail_first)
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) {
        self.inner.disconnect().await
    }

    fn supports_pipelines(&self) -> bool {
        self.inner.supports_pipelines()
    }

    async fn call(&self, op: &str, args: &[Value], kwargs: &KwArgs) -> Result<Value, BackendError> {
        self.calls_made.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    None
                }
            })
            .is_ok();

        if should_fail {
            return Err(BackendError::retryable("injected transient failure"));
        }

        self.inner.call(op, args, kwargs).await
    }

    fn pipeline(&self) -> Option<Box<dyn Pipeline>> {
        self.inner.pipeline()
    }
}
