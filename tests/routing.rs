//! Routing behavior for each router variant (§4.2, §8 properties 1-6).

use std::collections::BTreeMap;
use std::time::Duration;

use shard_cluster::backends::memory::{InMemoryBackend, MemoryHostConfig};
use shard_cluster::{Cluster, ClusterConfig, RouterConfig, Value};

fn three_shard_config(router: RouterConfig) -> ClusterConfig<InMemoryBackend> {
    let mut config = ClusterConfig::new(router);
    for num in 0..3 {
        config = config.with_host(num, MemoryHostConfig::new(format!("mem-{num}:0")));
    }
    config
}

#[tokio::test]
async fn broadcast_fans_out_a_keyless_call_to_every_shard() {
    let cluster = Cluster::new(three_shard_config(RouterConfig::Broadcast))
        .await
        .unwrap();

    let result = cluster
        .execute("set", &[Value::from("k"), Value::from("v")], &BTreeMap::new())
        .await
        .unwrap();

    // Broadcast always returns every shard regardless of args, so a single
    // call becomes a list of per-shard results (§4.2, "CallProxy" rule).
    match result {
        Value::List(values) => assert_eq!(values.len(), 3),
        other => panic!("expected a list of per-shard results, got {other:?}"),
    }

    for num in 0..3 {
        let shard = cluster.shard(num).unwrap();
        let stored = shard.backend().call("get", &[Value::from("k")], &BTreeMap::new()).await.unwrap();
        assert_eq!(stored, Value::Str("v".into()));
    }
}

#[tokio::test]
async fn partition_is_deterministic_for_a_given_key() {
    let cluster = Cluster::new(three_shard_config(RouterConfig::Partition))
        .await
        .unwrap();

    let router = cluster.router();
    let first = router
        .get_dbs("get", &[Value::from("alpha")], &BTreeMap::new(), None)
        .await
        .unwrap();
    let second = router
        .get_dbs("get", &[Value::from("alpha")], &BTreeMap::new(), None)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
}

#[tokio::test]
async fn partition_requires_a_key() {
    let cluster = Cluster::new(three_shard_config(RouterConfig::Partition))
        .await
        .unwrap();

    let err = cluster
        .router()
        .get_dbs("get", &[], &BTreeMap::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, shard_cluster::RouterError::InvalidInput(_)));
}

#[tokio::test]
async fn round_robin_rotates_across_shards() {
    let cluster = Cluster::new(three_shard_config(RouterConfig::RoundRobin {
        retry_timeout: Duration::from_secs(30),
        attempt_reconnect_threshold: 100_000,
    }))
    .await
    .unwrap();

    let mut seen = Vec::new();
    for _ in 0..6 {
        let db_nums = cluster
            .router()
            .get_dbs("get", &[Value::from("k")], &BTreeMap::new(), None)
            .await
            .unwrap();
        seen.push(db_nums[0]);
    }

    // Six picks over three shards, cycling, should touch every shard twice.
    let mut counts = BTreeMap::new();
    for num in seen {
        *counts.entry(num).or_insert(0) += 1;
    }
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&c| c == 2));
}

#[tokio::test]
async fn round_robin_skips_a_shard_marked_down() {
    let cluster = Cluster::new(three_shard_config(RouterConfig::RoundRobin {
        retry_timeout: Duration::from_secs(30),
        attempt_reconnect_threshold: 100_000,
    }))
    .await
    .unwrap();

    cluster
        .router()
        .get_dbs("get", &[Value::from("k")], &BTreeMap::new(), Some(1))
        .await
        .unwrap();

    for _ in 0..6 {
        let db_nums = cluster
            .router()
            .get_dbs("get", &[Value::from("k")], &BTreeMap::new(), None)
            .await
            .unwrap();
        assert_ne!(db_nums[0], 1, "shard 1 was marked down and must be skipped");
    }
}

#[tokio::test]
async fn get_conn_returns_the_shard_the_router_selects() {
    let cluster = Cluster::new(three_shard_config(RouterConfig::Partition))
        .await
        .unwrap();

    let shards = cluster
        .get_conn(&[Value::from("alpha")], &BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(shards.len(), 1);
    let expected = cluster
        .router()
        .get_dbs("get_conn", &[Value::from("alpha")], &BTreeMap::new(), None)
        .await
        .unwrap();
    assert_eq!(shards[0].num, expected[0]);
}

#[tokio::test]
async fn get_conn_broadcasts_to_every_shard_with_no_args() {
    let cluster = Cluster::new(three_shard_config(RouterConfig::Broadcast))
        .await
        .unwrap();

    let shards = cluster.get_conn(&[], &BTreeMap::new()).await.unwrap();
    assert_eq!(shards.len(), 3);
}

#[tokio::test]
async fn consistent_hash_routes_a_key_to_exactly_one_shard() {
    let cluster = Cluster::new(three_shard_config(RouterConfig::ConsistentHash {
        retry_timeout: Duration::from_secs(30),
        attempt_reconnect_threshold: 100_000,
    }))
    .await
    .unwrap();

    let first = cluster
        .router()
        .get_dbs("get", &[Value::from("alpha")], &BTreeMap::new(), None)
        .await
        .unwrap();
    let second = cluster
        .router()
        .get_dbs("get", &[Value::from("alpha")], &BTreeMap::new(), None)
        .await
        .unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
}
