//! Round-robin router (§4.2) with health-window based failover.
//!
//! Grounded on `nydus.db.routers.base.RoundRobinRouter`: a cyclic iterator
//! over shard indices, a `down_connections` health window, and a sweep
//! triggered by an attempt counter.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::RoutingPolicy;
use crate::error::{Result, RouterError};
use crate::shard::ShardDescriptor;
use crate::value::{KwArgs, Value};

/// Shared bookkeeping reused verbatim by [`super::ConsistentHashPolicy`],
/// which extends round-robin health tracking with ring membership (§4.2).
#[derive(Debug)]
pub struct RoundRobinState {
    shard_nums: RwLock<Vec<u32>>,
    cursor: AtomicUsize,
    down_connections: DashMap<u32, Instant>,
    get_db_attempts: AtomicU64,
    retry_timeout: Duration,
    attempt_reconnect_threshold: u64,
}

impl RoundRobinState {
    pub fn new(retry_timeout: Duration, attempt_reconnect_threshold: u64) -> Self {
        Self {
            shard_nums: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            down_connections: DashMap::new(),
            get_db_attempts: AtomicU64::new(0),
            retry_timeout,
            attempt_reconnect_threshold,
        }
    }

    pub fn setup(&self, shards: &[ShardDescriptor]) {
        *self.shard_nums.write() = shards.iter().map(|s| s.num).collect();
    }

    pub fn all_shards(&self) -> Vec<u32> {
        self.shard_nums.read().clone()
    }

    /// Re-admit any shard whose down window has expired.
    pub fn check_down_connections(&self) {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .down_connections
            .iter()
            .filter(|e| *e.value() + self.retry_timeout <= now)
            .map(|e| *e.key())
            .collect();
        for num in expired {
            self.down_connections.remove(&num);
        }
    }

    /// Re-admit every down shard regardless of its window (supplemented
    /// feature, SPEC_FULL.md §10, grounded on `flush_down_connections`).
    pub fn flush_down_connections(&self) {
        self.get_db_attempts.store(0, Ordering::SeqCst);
        self.down_connections.clear();
    }

    pub fn mark_down(&self, num: u32) {
        self.down_connections.insert(num, Instant::now());
    }

    pub fn mark_up(&self, num: u32) {
        self.down_connections.remove(&num);
    }

    pub fn is_down(&self, num: u32) -> bool {
        match self.down_connections.get(&num) {
            Some(marked_down_at) => *marked_down_at + self.retry_timeout > Instant::now(),
            None => false,
        }
    }

    pub fn pre_routing_tick(&self, retry_for: Option<u32>) {
        let attempts = self.get_db_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts > self.attempt_reconnect_threshold {
            self.check_down_connections();
        }
        if let Some(num) = retry_for {
            self.mark_down(num);
        }
    }

    /// Advance the cycle, skipping shards currently marked down (§4.2).
    pub fn route(&self) -> Result<Vec<u32>> {
        let shard_nums = self.shard_nums.read();
        if shard_nums.is_empty() {
            return Err(RouterError::HostListExhausted);
        }

        for _ in 0..shard_nums.len() {
            let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % shard_nums.len();
            let num = shard_nums[idx];
            if !self.is_down(num) {
                return Ok(vec![num]);
            }
        }

        Err(RouterError::HostListExhausted)
    }

    pub fn post_routing(&self, db_nums: Vec<u32>) -> Vec<u32> {
        if let Some(&first) = db_nums.first() {
            if self.down_connections.contains_key(&first) {
                self.mark_up(first);
            }
        }
        db_nums
    }
}

#[derive(Debug)]
pub struct RoundRobinPolicy {
    pub(crate) state: RoundRobinState,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self::with_timing(Duration::from_secs(30), 100_000)
    }

    pub fn with_timing(retry_timeout: Duration, attempt_reconnect_threshold: u64) -> Self {
        Self {
            state: RoundRobinState::new(retry_timeout, attempt_reconnect_threshold),
        }
    }

    pub fn mark_connection_down(&self, num: u32) {
        self.state.mark_down(num);
    }

    pub fn mark_connection_up(&self, num: u32) {
        self.state.mark_up(num);
    }

    pub fn flush_down_connections(&self) {
        self.state.flush_down_connections();
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoutingPolicy for RoundRobinPolicy {
    async fn setup(&self, shards: &[ShardDescriptor]) -> Result<bool> {
        self.state.setup(shards);
        Ok(true)
    }

    async fn pre_routing(
        &self,
        _attr: &str,
        args: Vec<Value>,
        kwargs: KwArgs,
        retry_for: Option<u32>,
    ) -> Result<(Vec<Value>, KwArgs)> {
        self.state.pre_routing_tick(retry_for);
        Ok((args, kwargs))
    }

    async fn route(&self, _attr: &str, _args: &[Value], _kwargs: &KwArgs) -> Result<Vec<u32>> {
        self.state.route()
    }

    async fn post_routing(&self, _attr: &str, db_nums: Vec<u32>) -> Vec<u32> {
        self.state.post_routing(db_nums)
    }

    fn is_retryable(&self) -> bool {
        true
    }

    fn all_shards(&self) -> Vec<u32> {
        self.state.all_shards()
    }
}
