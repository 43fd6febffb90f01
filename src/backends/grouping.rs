//! A reference backend demonstrating the memcached-style pipeline command
//! regrouping optimization (§4.4, §10): contiguous runs of `set`/`get`/
//! `delete` calls queued in one pipeline round-trip are coalesced into a
//! single `set_multi`/`get_multi`/`delete_multi` call, grounded on
//! `nydus.db.backends.memcache`'s `regroup_commands`.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::backend::{Backend, BackendError, Pipeline};
use crate::value::{KwArgs, Value};

use super::memory::{apply, MemoryHostConfig, QueuedCall, Store};

#[derive(Debug)]
pub struct GroupingMemoryBackend {
    identifier: String,
    store: Store,
    round_trips: Arc<AtomicU32>,
}

impl GroupingMemoryBackend {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            store: Store::new(DashMap::new()),
            round_trips: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Number of backend round-trips the last (or ongoing) pipeline
    /// `execute()` issued, i.e. the number of groups `regroup_commands`
    /// produced. Used by the regrouping test suite to confirm that commands
    /// with mismatched shared args/kwargs split into separate groups instead
    /// of being incorrectly coalesced (§8 property 10).
    pub fn round_trips(&self) -> u32 {
        self.round_trips.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for GroupingMemoryBackend {
    type HostConfig = MemoryHostConfig;

    fn from_host_config(_num: u32, config: Self::HostConfig) -> Self {
        Self::new(config.identifier)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn connect(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    fn supports_pipelines(&self) -> bool {
        true
    }

    async fn call(&self, op: &str, args: &[Value], kwargs: &KwArgs) -> Result<Value, BackendError> {
        apply(&self.store, op, args, kwargs)
    }

    fn pipeline(&self) -> Option<Box<dyn Pipeline>> {
        Some(Box::new(GroupingPipeline {
            store: Store::clone(&self.store),
            queued: Vec::new(),
            round_trips: Arc::clone(&self.round_trips),
        }))
    }
}

struct GroupingPipeline {
    store: Store,
    queued: Vec<QueuedCall>,
    round_trips: Arc<AtomicU32>,
}

/// The grouped `_multi` operation for an op that can be batched, or `None`
/// for ops the regrouping pass leaves alone.
fn groupable(op: &str) -> Option<&'static str> {
    match op {
        "set" => Some("set_multi"),
        "get" => Some("get_multi"),
        "delete" => Some("delete_multi"),
        _ => None,
    }
}

/// The arguments shared across every command in a group, i.e. everything
/// beyond the key (and, for `set`, the value) -- `nydus.db.backends.memcache
/// .grouped_args_for_command`.
fn shared_args(call: &QueuedCall) -> &[Value] {
    if call.op == "set" {
        call.args.get(2..).unwrap_or(&[])
    } else {
        call.args.get(1..).unwrap_or(&[])
    }
}

/// Two queued calls may be coalesced into the same `_multi` round-trip only
/// if they're the same op and their shared argument signature -- trailing
/// positional args plus every kwarg -- matches exactly (`can_group_commands`).
/// A `set(k, v, timeout=60)` and a `set(k, v, timeout=30)` must NOT merge.
fn can_group(a: &QueuedCall, b: &QueuedCall) -> bool {
    a.op == b.op && shared_args(a) == shared_args(b) && a.kwargs == b.kwargs
}

#[async_trait]
impl Pipeline for GroupingPipeline {
    fn add(&mut self, call_id: u64, op: &str, args: Vec<Value>, kwargs: KwArgs) {
        self.queued.push(QueuedCall {
            call_id,
            op: op.to_string(),
            args,
            kwargs,
        });
    }

    async fn execute(&mut self) -> Result<BTreeMap<u64, Result<Value, BackendError>>, BackendError> {
        let mut out = BTreeMap::new();
        let mut i = 0;

        while i < self.queued.len() {
            let op = self.queued[i].op.clone();

            let Some(grouped_op) = groupable(&op) else {
                let call = &self.queued[i];
                out.insert(call.call_id, apply(&self.store, &call.op, &call.args, &call.kwargs));
                self.round_trips.fetch_add(1, Ordering::SeqCst);
                i += 1;
                continue;
            };

            // Coalesce the contiguous run of ops sharing both the op name
            // and the grouping signature (shared args + kwargs) starting at
            // `i` into a single `_multi` round-trip. A command whose shared
            // signature differs (e.g. a different `timeout`) breaks the run
            // here, just as `regroup_commands` starts a fresh group.
            let mut j = i;
            let mut call_ids = Vec::new();
            let mut keys = Vec::new();
            let mut pairs = Vec::new();
            while j < self.queued.len() && can_group(&self.queued[i], &self.queued[j]) {
                let call = &self.queued[j];
                call_ids.push(call.call_id);
                if let Some(key) = call.args.first() {
                    keys.push(key.clone());
                    if op == "set" {
                        let value = call.args.get(1).cloned().unwrap_or(Value::Null);
                        pairs.push(Value::List(vec![key.clone(), value]));
                    }
                }
                j += 1;
            }

            // The shared args/kwargs carried by every command in the group
            // (e.g. `timeout`) ride along with the `_multi` call so they
            // aren't silently dropped on the floor.
            let base = &self.queued[i];
            let extra_args = shared_args(base);
            let shared_kwargs = base.kwargs.clone();

            let result = match grouped_op {
                "set_multi" => {
                    let mut call_args = vec![Value::List(pairs.clone())];
                    call_args.extend_from_slice(extra_args);
                    apply(&self.store, "set_multi", &call_args, &shared_kwargs)
                }
                "get_multi" => {
                    let mut call_args = vec![Value::List(keys.clone())];
                    call_args.extend_from_slice(extra_args);
                    apply(&self.store, "get_multi", &call_args, &shared_kwargs)
                }
                "delete_multi" => {
                    let mut call_args = vec![Value::List(keys.clone())];
                    call_args.extend_from_slice(extra_args);
                    apply(&self.store, "delete_multi", &call_args, &shared_kwargs)
                }
                _ => unreachable!(),
            };
            self.round_trips.fetch_add(1, Ordering::SeqCst);

            match result {
                Ok(Value::List(values)) if grouped_op == "get_multi" => {
                    for (call_id, value) in call_ids.into_iter().zip(values.into_iter()) {
                        out.insert(call_id, Ok(value));
                    }
                }
                Ok(value) => {
                    for call_id in call_ids {
                        out.insert(call_id, Ok(value.clone()));
                    }
                }
                Err(e) => {
                    for call_id in call_ids {
                        out.insert(call_id, Err(e.clone()));
                    }
                }
            }

            i = j;
        }

        Ok(out)
    }
}
