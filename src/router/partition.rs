//! Partition (CRC32 modulo) router (§4.2): deterministic function of the key.
//!
//! SPEC_FULL.md §10 resolves the source's contradictory revisions (raise vs.
//! silently fail on a missing key) in favor of requiring a key.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::RoutingPolicy;
use crate::error::{Result, RouterError};
use crate::shard::ShardDescriptor;
use crate::value::{get_key, KwArgs, Value};

#[derive(Debug, Default)]
pub struct PartitionPolicy {
    shard_nums: RwLock<Vec<u32>>,
}

impl PartitionPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoutingPolicy for PartitionPolicy {
    async fn setup(&self, shards: &[ShardDescriptor]) -> Result<bool> {
        *self.shard_nums.write() = shards.iter().map(|s| s.num).collect();
        Ok(true)
    }

    async fn route(&self, _attr: &str, args: &[Value], kwargs: &KwArgs) -> Result<Vec<u32>> {
        let key = get_key(args, kwargs).ok_or_else(|| {
            RouterError::InvalidInput("PartitionRouter requires a routing key".into())
        })?;

        let n = self.shard_nums.read().len() as u32;
        if n == 0 {
            return Err(RouterError::HostListExhausted);
        }

        let hash = crc32fast::hash(&key.as_key_bytes());
        Ok(vec![hash % n])
    }

    fn all_shards(&self) -> Vec<u32> {
        self.shard_nums.read().clone()
    }
}
