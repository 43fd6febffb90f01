//! Cluster-level retry/failover semantics (§4.3, §8 properties 7-8).

use std::collections::BTreeMap;
use std::time::Duration;

use shard_cluster::backends::flaky::{FlakyBackend, FlakyHostConfig};
use shard_cluster::backends::memory::{InMemoryBackend, MemoryHostConfig};
use shard_cluster::{Cluster, ClusterConfig, RouterConfig, RouterError, Value};

fn round_robin_config(max_connection_retries: u32) -> ClusterConfig<FlakyBackend<InMemoryBackend>> {
    ClusterConfig::new(RouterConfig::RoundRobin {
        retry_timeout: Duration::from_secs(30),
        attempt_reconnect_threshold: 100_000,
    })
    .with_max_connection_retries(max_connection_retries)
}

#[tokio::test]
async fn a_retryable_failure_fails_over_to_another_shard() {
    // Shard 0 fails its first call; shard 1 never fails. With two shards
    // and one retry budgeted, the cluster must succeed by trying again on
    // whichever shard the router picks next.
    let config = round_robin_config(2)
        .with_host(
            0,
            FlakyHostConfig {
                inner: MemoryHostConfig::new("mem-0:0"),
                fail_first: 10,
            },
        )
        .with_host(
            1,
            FlakyHostConfig {
                inner: MemoryHostConfig::new("mem-1:0"),
                fail_first: 0,
            },
        );
    let cluster = Cluster::new(config).await.unwrap();

    // The round-robin cursor starts at shard 0, which is flaky; the retry
    // loop must fail over to shard 1.
    let result = cluster
        .execute("get", &[Value::from("k")], &BTreeMap::new())
        .await;

    assert!(result.is_ok(), "expected failover to succeed, got {result:?}");
}

#[tokio::test]
async fn retry_budget_exhaustion_surfaces_max_retries_exceeded() {
    // A single shard that always fails: the cluster must make exactly
    // `max_connection_retries` attempts against it before giving up (§8
    // property 7), not one more and not one fewer. `retry_timeout` is zeroed
    // so the round-robin health window expires instantly and the lone shard
    // stays eligible for every retry instead of being skipped as "down".
    let max_connection_retries = 3;
    let config = ClusterConfig::new(RouterConfig::RoundRobin {
        retry_timeout: Duration::from_millis(0),
        attempt_reconnect_threshold: 100_000,
    })
    .with_max_connection_retries(max_connection_retries)
    .with_host(
        0,
        FlakyHostConfig {
            inner: MemoryHostConfig::new("mem-0:0"),
            fail_first: 100,
        },
    );
    let cluster = Cluster::new(config).await.unwrap();

    let result = cluster
        .execute("get", &[Value::from("k")], &BTreeMap::new())
        .await;

    assert!(matches!(result, Err(RouterError::MaxRetriesExceeded { .. })));
    assert_eq!(
        cluster.shard(0).unwrap().backend().calls_made(),
        max_connection_retries,
        "expected exactly max_connection_retries backend attempts"
    );
}

#[tokio::test]
async fn an_application_error_does_not_trigger_failover() {
    let cluster = Cluster::new(
        ClusterConfig::<InMemoryBackend>::new(RouterConfig::Partition)
            .with_host(0, MemoryHostConfig::new("mem-0:0")),
    )
    .await
    .unwrap();

    // "get_multi" with a non-list argument is an application-level error
    // (BackendError::application), never retryable.
    let result = cluster
        .execute("get_multi", &[Value::from("not-a-list")], &BTreeMap::new())
        .await;

    assert!(matches!(result, Err(RouterError::Backend(_))));
}
