//! Client-side sharding and fan-out engine for key/value store clusters.
//!
//! Four pieces compose the crate: a [`backend::Backend`] contract drivers
//! implement, a [`router`] layer that maps an operation onto one or more
//! shard indices, a [`cluster::Cluster`] that wires the two together with
//! retry-on-failover, and a [`dispatch`] engine backing
//! [`cluster::Cluster::map`]'s fan-out scope.

pub mod backend;
pub mod backends;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod router;
pub mod shard;
pub mod value;

pub use backend::{Backend, BackendError, Pipeline};
pub use cluster::Cluster;
pub use config::{ClusterConfig, RouterConfig};
pub use dispatch::promise::{PromiseHandle, PromiseId};
pub use dispatch::Dispatcher;
pub use error::{Result, RouterError};
pub use router::Router;
pub use shard::{Shard, ShardDescriptor};
pub use value::{get_key, KwArgs, Value};
