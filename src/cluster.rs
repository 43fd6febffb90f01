//! The cluster (§3, §4.3): owns the shard set, routes and retries calls, and
//! opens the `map()` dispatch scope (§4.4).
//!
//! Grounded on `nydus.db.base.BaseCluster`: lazy per-call routing, a retry
//! loop that asks the router for an alternate shard on a retryable error,
//! and a dispatch-scope entry point.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::backend::Backend;
use crate::config::ClusterConfig;
use crate::dispatch::promise::PromiseHandle;
use crate::dispatch::Dispatcher;
use crate::error::{Result, RouterError};
use crate::router::Router;
use crate::shard::{Shard, ShardDescriptor};
use crate::value::{KwArgs, Value};

/// A client-side shard set with routing and failover (§3).
pub struct Cluster<B: Backend> {
    shards: BTreeMap<u32, Shard<B>>,
    pub(crate) router: Arc<dyn Router>,
    max_connection_retries: u32,
}

impl<B: Backend> Cluster<B> {
    /// Build every shard's backend from `config`, then run the router's
    /// one-time setup (§4.2) against the resulting shard descriptors.
    pub async fn new(config: ClusterConfig<B>) -> Result<Arc<Self>> {
        let max_connection_retries = config.max_connection_retries;
        let router = config.router.build();
        let backends = config.build_backends()?;

        let mut shards = BTreeMap::new();
        let mut descriptors = Vec::with_capacity(backends.len());
        for (num, (backend, weight)) in backends {
            let shard = Shard::new(num, backend);
            descriptors.push(ShardDescriptor {
                num,
                identifier: shard.identifier().to_string(),
                weight,
            });
            shards.insert(num, shard);
        }

        router.setup(&descriptors).await?;

        Ok(Arc::new(Self {
            shards,
            router,
            max_connection_retries,
        }))
    }

    pub fn shard(&self, num: u32) -> Option<&Shard<B>> {
        self.shards.get(&num)
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn router(&self) -> &Arc<dyn Router> {
        &self.router
    }

    pub async fn disconnect(&self) {
        for shard in self.shards.values() {
            shard.backend().disconnect().await;
        }
    }

    /// Execute a call with retry-on-failover (§4.3).
    ///
    /// Routes once; a call that lands on more than one shard (e.g. under
    /// [`crate::router::BroadcastPolicy`]) runs against every one of them
    /// and the results become a [`Value::List`] -- mirroring the source's
    /// `CallProxy` "single value if one db, else a list" rule. Each shard
    /// gets its own retry budget: on a retryable backend error (and only
    /// when the router opts into failover via [`Router::is_retryable`]) the
    /// router is asked for an alternate shard via `retry_for`, up to
    /// `max_connection_retries` attempts. Application-level errors
    /// propagate immediately; no shard is ever marked down for them (§7).
    pub async fn execute(&self, op: &str, args: &[Value], kwargs: &KwArgs) -> Result<Value> {
        let db_nums = self.router.get_dbs(op, args, kwargs, None).await?;
        if db_nums.is_empty() {
            return Err(RouterError::HostListExhausted);
        }

        let mut values = Vec::with_capacity(db_nums.len());
        for num in db_nums {
            values.push(self.execute_on_shard(op, args, kwargs, num).await?);
        }

        if values.len() == 1 {
            Ok(values.into_iter().next().unwrap())
        } else {
            Ok(Value::List(values))
        }
    }

    async fn execute_on_shard(
        &self,
        op: &str,
        args: &[Value],
        kwargs: &KwArgs,
        first_num: u32,
    ) -> Result<Value> {
        let mut num = first_num;
        let mut retry_for = None;
        let mut attempts = 0u32;

        loop {
            if let Some(failed_num) = retry_for {
                let db_nums = self.router.get_dbs(op, args, kwargs, Some(failed_num)).await?;
                num = *db_nums.first().ok_or(RouterError::HostListExhausted)?;
            }

            let shard = self.shards.get(&num).ok_or(RouterError::HostListExhausted)?;
            debug!(shard = num, op, "routed call");

            match shard.backend().call(op, args, kwargs).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && self.router.is_retryable() => {
                    attempts += 1;
                    warn!(shard = num, attempts, "shard call failed, retrying");
                    if attempts >= self.max_connection_retries {
                        error!(shard = num, attempts, "retry budget exceeded");
                        return Err(RouterError::MaxRetriesExceeded {
                            attempts,
                            source: Box::new(RouterError::Retryable(Arc::new(e))),
                        });
                    }
                    retry_for = Some(num);
                }
                Err(e) if e.is_retryable() => return Err(RouterError::Retryable(Arc::new(e))),
                Err(e) => return Err(RouterError::Backend(Arc::new(e))),
            }
        }
    }

    /// Consult the router with a pseudo-operation and return the selected
    /// shard(s) directly, without invoking a backend call (§4.3). Useful
    /// when a caller wants a raw connection to issue driver-specific
    /// commands the typed `execute` surface doesn't cover.
    pub async fn get_conn(&self, args: &[Value], kwargs: &KwArgs) -> Result<Vec<&Shard<B>>> {
        let db_nums = self.router.get_dbs("get_conn", args, kwargs, None).await?;
        if db_nums.is_empty() {
            return Err(RouterError::HostListExhausted);
        }
        db_nums
            .into_iter()
            .map(|num| self.shards.get(&num).ok_or(RouterError::HostListExhausted))
            .collect()
    }

    /// Open a dispatch scope (§4.4): `record` synchronously queues calls via
    /// the dispatcher -- the Rust substitute for the source's
    /// `with cluster.map() as conn:` context manager (spec.md §9 Design
    /// Notes) -- after which every queued call is grouped by shard and
    /// resolved concurrently.
    pub async fn map<F>(
        self: &Arc<Self>,
        workers: Option<usize>,
        fail_silently: bool,
        record: F,
    ) -> Result<Vec<PromiseHandle>>
    where
        F: FnOnce(&Dispatcher<B>),
    {
        let dispatcher = Dispatcher::new(Arc::clone(self));
        record(&dispatcher);
        dispatcher.resolve(workers, fail_silently).await
    }
}
