//! Broadcast router (§4.2): routes every call to every shard.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::RoutingPolicy;
use crate::error::Result;
use crate::shard::ShardDescriptor;
use crate::value::{KwArgs, Value};

#[derive(Debug, Default)]
pub struct BroadcastPolicy {
    shard_nums: RwLock<Vec<u32>>,
}

impl BroadcastPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoutingPolicy for BroadcastPolicy {
    async fn setup(&self, shards: &[ShardDescriptor]) -> Result<bool> {
        *self.shard_nums.write() = shards.iter().map(|s| s.num).collect();
        Ok(true)
    }

    async fn route(&self, _attr: &str, _args: &[Value], _kwargs: &KwArgs) -> Result<Vec<u32>> {
        Ok(self.all_shards())
    }

    fn all_shards(&self) -> Vec<u32> {
        self.shard_nums.read().clone()
    }
}
