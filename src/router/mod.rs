//! The routing layer (§4.2): pluggable policies that map
//! `(operation, args, kwargs) -> [shard index]`.
//!
//! All four variants share the routing pipeline skeleton described in §4.2.
//! Rather than duplicate that skeleton in every `Router` impl (the source
//! does this via subclassing `BaseRouter`), it lives once in [`PolicyRouter`]
//! and each variant supplies a [`RoutingPolicy`].

pub mod broadcast;
pub mod ketama;
pub mod partition;
pub mod round_robin;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, RouterError};
use crate::shard::ShardDescriptor;
use crate::value::{KwArgs, Value};

pub use broadcast::BroadcastPolicy;
pub use ketama::ConsistentHashPolicy;
pub use partition::PartitionPolicy;
pub use round_robin::RoundRobinPolicy;

/// Public router contract (§4.2): `get_dbs(attr, args, kwargs, retry_for)`.
#[async_trait]
pub trait Router: Send + Sync {
    /// Called once, lazily, before the first routing decision.
    async fn setup(&self, shards: &[ShardDescriptor]) -> Result<()>;

    async fn get_dbs(
        &self,
        attr: &str,
        args: &[Value],
        kwargs: &KwArgs,
        retry_for: Option<u32>,
    ) -> Result<Vec<u32>>;

    /// Whether a retryable backend error should be retried against an
    /// alternate shard chosen by this router (§4.3).
    fn is_retryable(&self) -> bool {
        false
    }
}

/// What a concrete routing strategy supplies to the shared skeleton.
///
/// Step numbering matches §4.2:
/// 1. [`setup`](RoutingPolicy::setup)
/// 2. [`pre_routing`](RoutingPolicy::pre_routing)
/// 3. (skeleton) broadcast-if-no-key rule
/// 4. [`route`](RoutingPolicy::route)
/// 5. [`post_routing`](RoutingPolicy::post_routing)
#[async_trait]
pub trait RoutingPolicy: Send + Sync {
    async fn setup(&self, shards: &[ShardDescriptor]) -> Result<bool>;

    async fn pre_routing(
        &self,
        _attr: &str,
        args: Vec<Value>,
        kwargs: KwArgs,
        _retry_for: Option<u32>,
    ) -> Result<(Vec<Value>, KwArgs)> {
        Ok((args, kwargs))
    }

    async fn route(&self, attr: &str, args: &[Value], kwargs: &KwArgs) -> Result<Vec<u32>>;

    async fn post_routing(&self, _attr: &str, db_nums: Vec<u32>) -> Vec<u32> {
        db_nums
    }

    fn is_retryable(&self) -> bool {
        false
    }

    /// Every shard index, used for the "no key = fan out to all" rule and
    /// by the base policy's default `route`.
    fn all_shards(&self) -> Vec<u32>;
}

/// Applies the shared skeleton (§4.2 steps 1-5) around a [`RoutingPolicy`].
pub struct PolicyRouter<P: RoutingPolicy> {
    policy: P,
    ready: AtomicBool,
}

impl<P: RoutingPolicy> PolicyRouter<P> {
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            ready: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }
}

#[async_trait]
impl<P: RoutingPolicy> Router for PolicyRouter<P> {
    async fn setup(&self, shards: &[ShardDescriptor]) -> Result<()> {
        if !self.policy.setup(shards).await? {
            return Err(RouterError::UnableToSetupRouter);
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_dbs(
        &self,
        attr: &str,
        args: &[Value],
        kwargs: &KwArgs,
        retry_for: Option<u32>,
    ) -> Result<Vec<u32>> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(RouterError::UnableToSetupRouter);
        }

        let (args, kwargs) = self
            .policy
            .pre_routing(attr, args.to_vec(), kwargs.clone(), retry_for)
            .await?;

        if args.is_empty() && kwargs.is_empty() {
            return Ok(self.policy.all_shards());
        }

        let db_nums = self.policy.route(attr, &args, &kwargs).await?;

        Ok(self.policy.post_routing(attr, db_nums).await)
    }

    fn is_retryable(&self) -> bool {
        self.policy.is_retryable()
    }
}
