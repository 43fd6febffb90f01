//! A reference in-memory backend (§10): exercises the [`Backend`]/
//! [`Pipeline`] contract with `set`/`get`/`delete` and their `_multi`
//! counterparts. Used throughout the test suite and as a worked example.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{Backend, BackendError, Pipeline};
use crate::value::{KwArgs, Value};

pub(crate) type Store = Arc<DashMap<String, Value>>;

pub(crate) fn key_string(v: &Value) -> String {
    String::from_utf8_lossy(&v.as_key_bytes()).into_owned()
}

/// Per-host configuration for [`InMemoryBackend`] and
/// [`super::grouping::GroupingMemoryBackend`].
#[derive(Debug, Clone)]
pub struct MemoryHostConfig {
    pub identifier: String,
}

impl MemoryHostConfig {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }
}

/// Shared op implementation, reused by both direct calls and pipelines (and
/// by the grouping backend's coalesced `_multi` calls).
pub(crate) fn apply(
    store: &DashMap<String, Value>,
    op: &str,
    args: &[Value],
    kwargs: &KwArgs,
) -> Result<Value, BackendError> {
    match op {
        "set" => {
            let key = args
                .first()
                .ok_or_else(|| BackendError::application("set requires a key"))?;
            let value = args.get(1).cloned().unwrap_or(Value::Null);
            store.insert(key_string(key), value);
            Ok(Value::Null)
        }
        "get" => {
            let key = args
                .first()
                .ok_or_else(|| BackendError::application("get requires a key"))?;
            Ok(store
                .get(&key_string(key))
                .map(|v| v.clone())
                .unwrap_or(Value::Null))
        }
        "delete" => {
            let key = args
                .first()
                .ok_or_else(|| BackendError::application("delete requires a key"))?;
            Ok(Value::Bool(store.remove(&key_string(key)).is_some()))
        }
        "set_multi" => {
            // Mapping travels as a list of `[key, value]` pairs in `args[0]`
            // (mirroring the source's `set_multi(mapping, *shared_args,
            // **shared_kwargs)`, where `mapping` is a positional dict and
            // `kwargs` is whatever every coalesced `set` shared, e.g.
            // `timeout`). This store has no use for shared args/kwargs but
            // still receives them, so a real backend's `apply` could.
            let pairs = match args.first() {
                Some(Value::List(items)) => items,
                _ => {
                    return Err(BackendError::application(
                        "set_multi requires a list of [key, value] pairs",
                    ))
                }
            };
            for pair in pairs {
                if let Value::List(kv) = pair {
                    if let (Some(key), Some(value)) = (kv.first(), kv.get(1)) {
                        store.insert(key_string(key), value.clone());
                    }
                }
            }
            Ok(Value::Null)
        }
        "get_multi" => {
            let keys = match args.first() {
                Some(Value::List(items)) => items.clone(),
                _ => return Err(BackendError::application("get_multi requires a list of keys")),
            };
            let values = keys
                .iter()
                .map(|k| store.get(&key_string(k)).map(|v| v.clone()).unwrap_or(Value::Null))
                .collect();
            Ok(Value::List(values))
        }
        "delete_multi" => {
            let keys = match args.first() {
                Some(Value::List(items)) => items.clone(),
                _ => {
                    return Err(BackendError::application(
                        "delete_multi requires a list of keys",
                    ))
                }
            };
            let mut deleted = 0i64;
            for k in &keys {
                if store.remove(&key_string(k)).is_some() {
                    deleted += 1;
                }
            }
            Ok(Value::Int(deleted))
        }
        other => Err(BackendError::application(format!(
            "unsupported operation: {other}"
        ))),
    }
}

#[derive(Debug)]
pub struct InMemoryBackend {
    identifier: String,
    store: Store,
}

impl InMemoryBackend {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            store: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
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
        Some(Box::new(InMemoryPipeline {
            store: Arc::clone(&self.store),
            queued: Vec::new(),
        }))
    }
}

pub(crate) struct QueuedCall {
    pub(crate) call_id: u64,
    pub(crate) op: String,
    pub(crate) args: Vec<Value>,
    pub(crate) kwargs: KwArgs,
}

struct InMemoryPipeline {
    store: Store,
    queued: Vec<QueuedCall>,
}

#[async_trait]
impl Pipeline for InMemoryPipeline {
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
        for call in &self.queued {
            out.insert(call.call_id, apply(&self.store, &call.op, &call.args, &call.kwargs));
        }
        Ok(out)
    }
}
