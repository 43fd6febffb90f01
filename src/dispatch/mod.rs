//! The dispatch engine (§4.4): groups calls recorded inside a `map()` scope
//! by shard and resolves them concurrently, preferring each shard's native
//! pipeline when every selected shard supports one.
//!
//! Grounded on `nydus.db.map`: route every call first (a call that routes to
//! more than one shard, e.g. under `BroadcastRouter`, fans out and its
//! result becomes a list -- mirroring `CallProxy`'s "single value if one db,
//! else a list" rule), then group the resulting per-shard sub-calls,
//! preferring a pipelined round-trip when every targeted shard supports one,
//! else a bounded worker pool with one task per shard group so per-shard
//! ordering is preserved.

pub mod promise;

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::backend::{Backend, BackendError};
use crate::cluster::Cluster;
use crate::error::{Result, RouterError};
use crate::router::Router;
use crate::value::{KwArgs, Value};

use promise::{PromiseHandle, PromiseId, ResultMap};

const MAX_POOL_WORKERS: usize = 16;

fn classify(e: BackendError) -> RouterError {
    if e.is_retryable() {
        RouterError::Retryable(Arc::new(e))
    } else {
        RouterError::Backend(Arc::new(e))
    }
}

/// A call as recorded by the caller, before routing.
struct PendingCall {
    id: PromiseId,
    op: String,
    args: Vec<Value>,
    kwargs: KwArgs,
}

/// A recorded call after routing, annotated with every shard it targets.
struct RoutedCall {
    id: PromiseId,
    op: String,
    args: Vec<Value>,
    kwargs: KwArgs,
    db_nums: Vec<u32>,
}

/// One shard's copy of a routed call, queued against that shard's backend.
struct SubCall {
    call_id: PromiseId,
    op: String,
    args: Vec<Value>,
    kwargs: KwArgs,
}

/// Per-call results keyed by the shard that produced them, so a multi-shard
/// call (broadcast) can be reassembled in `db_nums` order regardless of
/// which shard task finishes first.
type Partials = Arc<Mutex<BTreeMap<PromiseId, BTreeMap<u32, Result<Value, RouterError>>>>>;

/// Records calls made inside a [`Cluster::map`] scope (§4.4).
pub struct Dispatcher<B: Backend> {
    cluster: Arc<Cluster<B>>,
    pending: Mutex<Vec<PendingCall>>,
    results: ResultMap,
}

impl<B: Backend> Dispatcher<B> {
    pub(crate) fn new(cluster: Arc<Cluster<B>>) -> Self {
        Self {
            cluster,
            pending: Mutex::new(Vec::new()),
            results: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Record a call by operation name (spec.md §9 Design Notes: the Rust
    /// substitute for the source's dynamic attribute dispatch).
    pub fn call(&self, op: &str, args: Vec<Value>, kwargs: KwArgs) -> PromiseHandle {
        let id = PromiseId::next();
        self.pending.lock().push(PendingCall {
            id,
            op: op.to_string(),
            args,
            kwargs,
        });
        PromiseHandle {
            id,
            results: Arc::clone(&self.results),
        }
    }

    pub(crate) async fn resolve(
        self,
        workers: Option<usize>,
        fail_silently: bool,
    ) -> Result<Vec<PromiseHandle>> {
        let pending = self.pending.into_inner();
        let handles: Vec<PromiseHandle> = pending
            .iter()
            .map(|c| PromiseHandle {
                id: c.id,
                results: Arc::clone(&self.results),
            })
            .collect();

        if pending.is_empty() {
            return Ok(handles);
        }

        // Step 1: route every call independently (§4.4).
        let mut routed = Vec::with_capacity(pending.len());
        for call in pending {
            let db_nums = self
                .cluster
                .router
                .get_dbs(&call.op, &call.args, &call.kwargs, None)
                .await?;
            if db_nums.is_empty() {
                return Err(RouterError::HostListExhausted);
            }
            routed.push(RoutedCall {
                id: call.id,
                op: call.op,
                args: call.args,
                kwargs: call.kwargs,
                db_nums,
            });
        }

        // Step 2: fan each routed call into one sub-call per targeted shard
        // and group sub-calls by shard.
        let mut groups: BTreeMap<u32, Vec<SubCall>> = BTreeMap::new();
        for call in &routed {
            for &num in &call.db_nums {
                groups.entry(num).or_default().push(SubCall {
                    call_id: call.id,
                    op: call.op.clone(),
                    args: call.args.clone(),
                    kwargs: call.kwargs.clone(),
                });
            }
        }

        debug!(shards = groups.len(), "map scope resolving");

        let partials: Partials = Arc::new(Mutex::new(BTreeMap::new()));

        if groups.len() == 1 {
            let (num, calls) = groups.into_iter().next().unwrap();
            self.run_group(num, calls, &partials).await;
        } else {
            let all_pipelined = groups.keys().all(|num| {
                self.cluster
                    .shard(*num)
                    .map(|s| s.backend().supports_pipelines())
                    .unwrap_or(false)
            });

            if all_pipelined {
                self.run_pipelined(groups, &partials).await;
            } else {
                self.run_pooled(groups, workers, &partials).await;
            }
        }

        // Step 3: reassemble each call's final value from its per-shard
        // partials, in `db_nums` order (single value if one shard, else a
        // list -- mirroring the source's `CallProxy` aggregation rule).
        {
            let partials = partials.lock();
            let mut results = self.results.lock();
            for call in &routed {
                let empty = BTreeMap::new();
                let parts = partials.get(&call.id).unwrap_or(&empty);

                let aggregated = if call.db_nums.len() == 1 {
                    parts
                        .get(&call.db_nums[0])
                        .cloned()
                        .unwrap_or(Err(RouterError::HostListExhausted))
                } else {
                    let mut values = Vec::with_capacity(call.db_nums.len());
                    let mut first_err = None;
                    for num in &call.db_nums {
                        match parts.get(num).cloned() {
                            Some(Ok(v)) => values.push(v),
                            Some(Err(e)) => {
                                first_err.get_or_insert(e);
                            }
                            None => {
                                first_err.get_or_insert(RouterError::HostListExhausted);
                            }
                        }
                    }
                    match first_err {
                        Some(e) => Err(e),
                        None => Ok(Value::List(values)),
                    }
                };

                results.insert(call.id, aggregated);
            }
        }

        let errors: Vec<(PromiseId, RouterError)> = {
            let results = self.results.lock();
            handles
                .iter()
                .filter_map(|h| match results.get(&h.id) {
                    Some(Err(e)) => Some((h.id, e.clone())),
                    _ => None,
                })
                .collect()
        };

        if !errors.is_empty() && !fail_silently {
            return Err(RouterError::CommandError(errors));
        }

        Ok(handles)
    }

    fn record(partials: &Partials, call_id: PromiseId, num: u32, result: Result<Value, RouterError>) {
        partials
            .lock()
            .entry(call_id)
            .or_default()
            .insert(num, result);
    }

    /// Single-shard fast path: no worker pool, no pipeline negotiation.
    async fn run_group(&self, num: u32, calls: Vec<SubCall>, partials: &Partials) {
        let Some(shard) = self.cluster.shard(num) else {
            for call in &calls {
                Self::record(partials, call.call_id, num, Err(RouterError::HostListExhausted));
            }
            return;
        };

        for call in calls {
            let result = shard
                .backend()
                .call(&call.op, &call.args, &call.kwargs)
                .await
                .map_err(classify);
            Self::record(partials, call.call_id, num, result);
        }
    }

    /// Every selected shard supports pipelines: one round-trip per shard.
    async fn run_pipelined(&self, groups: BTreeMap<u32, Vec<SubCall>>, partials: &Partials) {
        let mut join_set = JoinSet::new();

        for (num, calls) in groups {
            let shard = self.cluster.shard(num).cloned();
            let partials = Arc::clone(partials);

            join_set.spawn(async move {
                let Some(shard) = shard else {
                    for call in &calls {
                        Self::record(&partials, call.call_id, num, Err(RouterError::HostListExhausted));
                    }
                    return;
                };

                let Some(mut pipeline) = shard.backend().pipeline() else {
                    for call in &calls {
                        Self::record(&partials, call.call_id, num, Err(RouterError::HostListExhausted));
                    }
                    return;
                };

                for call in &calls {
                    pipeline.add(call.call_id.raw(), &call.op, call.args.clone(), call.kwargs.clone());
                }

                match pipeline.execute().await {
                    Ok(outcomes) => {
                        for call in &calls {
                            let outcome = outcomes.get(&call.call_id.raw()).cloned().unwrap_or_else(|| {
                                Err(BackendError::application(
                                    "pipeline did not return a result for this call",
                                ))
                            });
                            Self::record(&partials, call.call_id, num, outcome.map_err(classify));
                        }
                    }
                    Err(e) => {
                        // Pipeline-level failure: the same error applies to
                        // every queued call on this shard (§7).
                        warn!(shard = num, "pipeline execution failed");
                        let err = classify(e);
                        for call in &calls {
                            Self::record(&partials, call.call_id, num, Err(err.clone()));
                        }
                    }
                }
            });
        }

        while join_set.join_next().await.is_some() {}
    }

    /// Not every shard pipelines: bounded worker pool, one task per shard
    /// group so per-shard FIFO ordering is preserved (§4.4 pool mode),
    /// `min(workers or shard_count, 16)` concurrent tasks.
    async fn run_pooled(
        &self,
        groups: BTreeMap<u32, Vec<SubCall>>,
        workers: Option<usize>,
        partials: &Partials,
    ) {
        let concurrency = workers.unwrap_or(groups.len()).clamp(1, MAX_POOL_WORKERS);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set = JoinSet::new();

        for (num, calls) in groups {
            let shard = self.cluster.shard(num).cloned();
            let partials = Arc::clone(partials);
            let semaphore = Arc::clone(&semaphore);

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");

                let Some(shard) = shard else {
                    for call in &calls {
                        Self::record(&partials, call.call_id, num, Err(RouterError::HostListExhausted));
                    }
                    return;
                };

                for call in calls {
                    let result = shard
                        .backend()
                        .call(&call.op, &call.args, &call.kwargs)
                        .await
                        .map_err(classify);
                    Self::record(&partials, call.call_id, num, result);
                }
            });
        }

        while join_set.join_next().await.is_some() {}
    }
}
