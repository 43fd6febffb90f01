//! The `map()` dispatch scope (§4.4, §8 properties 9-10).

use std::collections::BTreeMap;

use async_trait::async_trait;

use shard_cluster::backend::{Backend, BackendError};
use shard_cluster::backends::grouping::GroupingMemoryBackend;
use shard_cluster::backends::memory::{InMemoryBackend, MemoryHostConfig};
use shard_cluster::{Cluster, ClusterConfig, RouterConfig, Value};

#[tokio::test]
async fn map_scope_resolves_every_call_in_a_single_shard_group() {
    let cluster = Cluster::new(
        ClusterConfig::<InMemoryBackend>::new(RouterConfig::Partition)
            .with_host(0, MemoryHostConfig::new("mem-0:0")),
    )
    .await
    .unwrap();

    let handles = cluster
        .map(None, false, |d| {
            d.call("set", vec![Value::from("a"), Value::from("1")], BTreeMap::new());
            d.call("set", vec![Value::from("b"), Value::from("2")], BTreeMap::new());
        })
        .await
        .unwrap();

    assert_eq!(handles.len(), 2);
    for h in &handles {
        assert!(!h.is_error());
    }

    let stored = cluster
        .shard(0)
        .unwrap()
        .backend()
        .call("get", &[Value::from("a")], &BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(stored, Value::Str("1".into()));
}

#[tokio::test]
async fn map_scope_groups_calls_by_shard_across_a_partitioned_cluster() {
    let mut config = ClusterConfig::<InMemoryBackend>::new(RouterConfig::Partition);
    for num in 0..4 {
        config = config.with_host(num, MemoryHostConfig::new(format!("mem-{num}:0")));
    }
    let cluster = Cluster::new(config).await.unwrap();

    let handles = cluster
        .map(None, false, |d| {
            for i in 0..20 {
                d.call(
                    "set",
                    vec![Value::from(format!("k{i}")), Value::from(i as i64)],
                    BTreeMap::new(),
                );
            }
        })
        .await
        .unwrap();

    assert_eq!(handles.len(), 20);
    assert!(handles.iter().all(|h| !h.is_error()));
}

#[tokio::test]
async fn map_scope_failure_policy_respects_fail_silently() {
    let cluster = Cluster::new(
        ClusterConfig::<InMemoryBackend>::new(RouterConfig::Partition)
            .with_host(0, MemoryHostConfig::new("mem-0:0")),
    )
    .await
    .unwrap();

    // "get_multi" with a scalar argument is an application-level error.
    let strict = cluster
        .map(None, false, |d| {
            d.call("get_multi", vec![Value::from("not-a-list")], BTreeMap::new());
        })
        .await;
    assert!(strict.is_err());

    let lenient = cluster
        .map(None, true, |d| {
            d.call("get_multi", vec![Value::from("not-a-list")], BTreeMap::new());
        })
        .await
        .unwrap();
    assert!(lenient[0].is_error());
}

#[tokio::test]
async fn grouping_backend_coalesces_consecutive_sets_into_one_round_trip() {
    let backend = GroupingMemoryBackend::new("mem-0:0");

    let mut pipeline = backend.pipeline().expect("grouping backend must pipeline");
    pipeline.add(1, "set", vec![Value::from("a"), Value::from("1")], BTreeMap::new());
    pipeline.add(2, "set", vec![Value::from("b"), Value::from("2")], BTreeMap::new());
    pipeline.add(3, "get", vec![Value::from("a")], BTreeMap::new());

    let results = pipeline.execute().await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[&3].as_ref().unwrap(), &Value::Str("1".into()));
}

#[tokio::test]
async fn grouping_backend_keeps_commands_with_matching_kwargs_in_one_group() {
    let backend = GroupingMemoryBackend::new("mem-0:0");
    let mut pipeline = backend.pipeline().expect("grouping backend must pipeline");

    let mut kwargs = BTreeMap::new();
    kwargs.insert("timeout".to_string(), Value::from(60));

    pipeline.add(1, "set", vec![Value::from("a"), Value::from("1")], kwargs.clone());
    pipeline.add(2, "set", vec![Value::from("b"), Value::from("2")], kwargs.clone());
    pipeline.add(3, "set", vec![Value::from("c"), Value::from("3")], kwargs);

    let results = pipeline.execute().await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.values().all(|r| r.is_ok()));
    assert_eq!(backend.round_trips(), 1, "identical timeouts must coalesce into one set_multi");
}

#[tokio::test]
async fn grouping_backend_splits_the_group_when_a_shared_kwarg_changes_mid_sequence() {
    // §8 property 10: a run of `set(k, v, timeout=T)` calls must only
    // coalesce with neighbors that share the exact same `T`. Two calls at
    // timeout=60 followed by two at timeout=30 must become two separate
    // `set_multi` round-trips, not one that silently picks up (or drops)
    // whichever timeout happened to belong to the first call.
    let backend = GroupingMemoryBackend::new("mem-0:0");
    let mut pipeline = backend.pipeline().expect("grouping backend must pipeline");

    let mut short_timeout = BTreeMap::new();
    short_timeout.insert("timeout".to_string(), Value::from(60));
    let mut long_timeout = BTreeMap::new();
    long_timeout.insert("timeout".to_string(), Value::from(30));

    pipeline.add(1, "set", vec![Value::from("a"), Value::from("1")], short_timeout.clone());
    pipeline.add(2, "set", vec![Value::from("b"), Value::from("2")], short_timeout);
    pipeline.add(3, "set", vec![Value::from("c"), Value::from("3")], long_timeout.clone());
    pipeline.add(4, "set", vec![Value::from("d"), Value::from("4")], long_timeout);

    let results = pipeline.execute().await.unwrap();
    assert_eq!(results.len(), 4);
    assert!(results.values().all(|r| r.is_ok()));
    assert_eq!(
        backend.round_trips(),
        2,
        "a changing timeout mid-sequence must split the group instead of merging all four sets"
    );

    for (key, expected) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")] {
        let value = backend
            .call("get", &[Value::from(key)], &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(value, Value::Str(expected.into()));
    }
}

/// A backend that never advertises pipeline support, forcing the dispatch
/// engine's pool-mode path (§4.4) instead of the pipelined one.
#[derive(Debug)]
struct NoPipelineBackend {
    inner: InMemoryBackend,
}

#[async_trait]
impl Backend for NoPipelineBackend {
    type HostConfig = MemoryHostConfig;

    fn from_host_config(num: u32, config: Self::HostConfig) -> Self {
        Self {
            inner: InMemoryBackend::from_host_config(num, config),
        }
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

    async fn call(&self, op: &str, args: &[Value], kwargs: &BTreeMap<String, Value>) -> Result<Value, BackendError> {
        self.inner.call(op, args, kwargs).await
    }
}

#[tokio::test]
async fn map_scope_falls_back_to_a_worker_pool_when_a_shard_cannot_pipeline() {
    let mut config = ClusterConfig::<NoPipelineBackend>::new(RouterConfig::Partition);
    for num in 0..3 {
        config = config.with_host(num, MemoryHostConfig::new(format!("mem-{num}:0")));
    }
    let cluster = Cluster::new(config).await.unwrap();

    let handles = cluster
        .map(Some(2), false, |d| {
            for i in 0..12 {
                d.call(
                    "set",
                    vec![Value::from(format!("k{i}")), Value::from(i as i64)],
                    BTreeMap::new(),
                );
            }
        })
        .await
        .unwrap();

    assert_eq!(handles.len(), 12);
    assert!(handles.iter().all(|h| !h.is_error()));
}
