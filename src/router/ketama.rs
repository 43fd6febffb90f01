//! Consistent-hash (Ketama) router (§4.2): md5-ring placement bit-compatible
//! with the reference Ketama algorithm, weighted by shard.
//!
//! Grounded on `nydus.contrib.ketama`: each shard gets
//! `floor(40 * num_shards * weight / total_weight)` points on the ring; every
//! point contributes four ring keys, one per 4-byte little-endian chunk of
//! the md5 digest of `"{identifier}-{point}-salt"`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Duration;
use tokio::sync::RwLock;

use super::round_robin::RoundRobinState;
use super::RoutingPolicy;
use crate::error::{Result, RouterError};
use crate::shard::ShardDescriptor;
use crate::value::{get_key, KwArgs, Value};

const POINTS_PER_SHARD_BASE: u32 = 40;

/// Pack 4 digest bytes into a ring key the same way a reference Ketama
/// client does: little-endian assembly of `digest[off..off+4]` (§4.2, §6.3).
fn pack_u32_le(b: &[u8]) -> u32 {
    (b[3] as u32) << 24 | (b[2] as u32) << 16 | (b[1] as u32) << 8 | (b[0] as u32)
}

/// Hash a lookup key the same way ring points are derived, so placement and
/// lookup agree bit-for-bit (§4.2's "hash the requested key with md5 the same
/// way").
fn hash_key(key: &[u8]) -> u32 {
    let digest = md5::compute(key);
    pack_u32_le(&digest.0[0..4])
}

fn ring_keys_for(identifier: &str, total_weight: u32, num_shards: u32, weight: u32) -> Vec<u32> {
    let points = (POINTS_PER_SHARD_BASE as u64 * num_shards as u64 * weight as u64
        / total_weight.max(1) as u64) as u32;
    let mut keys = Vec::with_capacity(points as usize * 4);

    for point in 0..points {
        let digest = md5::compute(format!("{}-{}-salt", identifier, point));
        for l in 0..4usize {
            keys.push(pack_u32_le(&digest.0[4 * l..4 * l + 4]));
        }
    }
    keys
}

#[derive(Debug, Default)]
struct Ring {
    points: BTreeMap<u32, u32>,
    weights: BTreeMap<u32, (String, u32)>,
}

impl Ring {
    fn rebuild(&mut self) {
        self.points.clear();
        let total_weight: u32 = self.weights.values().map(|(_, w)| *w).sum();
        let num_shards = self.weights.len() as u32;
        if total_weight == 0 || num_shards == 0 {
            return;
        }
        for (&num, (identifier, weight)) in self.weights.iter() {
            for key in ring_keys_for(identifier, total_weight, num_shards, *weight) {
                self.points.insert(key, num);
            }
        }
    }

    /// First ring point strictly after `hash` (reference Ketama's
    /// `bisect.bisect`, which is `bisect_right`), wrapping to the smallest
    /// point when `hash` is past every point on the ring.
    fn lookup(&self, hash: u32) -> Option<u32> {
        self.points
            .range((Bound::Excluded(hash), Bound::Unbounded))
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, &num)| num)
    }

    /// Walk the ring clockwise from just after `hash`, skipping shards `skip`
    /// rejects.
    fn lookup_skipping(&self, hash: u32, skip: impl Fn(u32) -> bool) -> Option<u32> {
        let forward = self
            .points
            .range((Bound::Excluded(hash), Bound::Unbounded))
            .map(|(_, &n)| n);
        let wrapped = self.points.range(..=hash).map(|(_, &n)| n);
        forward.chain(wrapped).find(|&n| !skip(n))
    }
}

/// Consistent-hash policy. Reuses [`RoundRobinState`] purely for its
/// `down_connections` health window -- the cursor it also maintains is
/// unused here since placement is hash-driven, not cyclic.
#[derive(Debug)]
pub struct ConsistentHashPolicy {
    ring: RwLock<Ring>,
    health: RoundRobinState,
}

impl ConsistentHashPolicy {
    pub fn new() -> Self {
        Self::with_timing(Duration::from_secs(30), 100_000)
    }

    pub fn with_timing(retry_timeout: Duration, attempt_reconnect_threshold: u64) -> Self {
        Self {
            ring: RwLock::new(Ring::default()),
            health: RoundRobinState::new(retry_timeout, attempt_reconnect_threshold),
        }
    }

    /// Add a weighted node to the ring and recompute placement (§10).
    pub async fn add_node(&self, num: u32, identifier: String, weight: u32) {
        let mut ring = self.ring.write().await;
        ring.weights.insert(num, (identifier, weight));
        ring.rebuild();
    }

    /// Remove a node from the ring and recompute placement (§10).
    pub async fn remove_node(&self, num: u32) {
        let mut ring = self.ring.write().await;
        ring.weights.remove(&num);
        ring.rebuild();
    }

    pub fn mark_connection_down(&self, num: u32) {
        self.health.mark_down(num);
    }

    pub fn mark_connection_up(&self, num: u32) {
        self.health.mark_up(num);
    }

    pub fn flush_down_connections(&self) {
        self.health.flush_down_connections();
    }
}

impl Default for ConsistentHashPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoutingPolicy for ConsistentHashPolicy {
    async fn setup(&self, shards: &[ShardDescriptor]) -> Result<bool> {
        self.health.setup(shards);
        let mut ring = self.ring.write().await;
        ring.weights = shards
            .iter()
            .map(|s| (s.num, (s.identifier.clone(), s.weight.max(1))))
            .collect();
        ring.rebuild();
        Ok(true)
    }

    async fn pre_routing(
        &self,
        _attr: &str,
        args: Vec<Value>,
        kwargs: KwArgs,
        retry_for: Option<u32>,
    ) -> Result<(Vec<Value>, KwArgs)> {
        self.health.pre_routing_tick(retry_for);
        Ok((args, kwargs))
    }

    async fn route(&self, _attr: &str, args: &[Value], kwargs: &KwArgs) -> Result<Vec<u32>> {
        let key = get_key(args, kwargs).ok_or_else(|| {
            RouterError::InvalidInput("ConsistentHashRouter requires a routing key".into())
        })?;

        let hash = hash_key(&key.as_key_bytes());
        let ring = self.ring.read().await;

        let chosen = ring
            .lookup_skipping(hash, |num| self.health.is_down(num))
            .or_else(|| ring.lookup(hash));

        match chosen {
            Some(num) => Ok(vec![num]),
            None => Err(RouterError::HostListExhausted),
        }
    }

    async fn post_routing(&self, _attr: &str, db_nums: Vec<u32>) -> Vec<u32> {
        self.health.post_routing(db_nums)
    }

    fn is_retryable(&self) -> bool {
        true
    }

    fn all_shards(&self) -> Vec<u32> {
        self.health.all_shards()
    }
}
