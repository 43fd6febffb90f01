//! Promise identity and handles (§3, §4.4).
//!
//! The source identifies a queued call by a hash of its name/args/kwargs
//! (`nydus.db.promise.EventualCommand`); `Value::Float` isn't `Hash` in
//! Rust, so this crate identifies a call by a monotonic id instead (a
//! resolved simplification, recorded in DESIGN.md).

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::RouterError;
use crate::value::Value;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one call recorded inside a [`crate::cluster::Cluster::map`] scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PromiseId(u64);

impl PromiseId {
    pub(crate) fn next() -> Self {
        PromiseId(NEXT_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// The raw id, used as the pipeline's call-id key (§3 Pipeline).
    pub(crate) fn raw(self) -> u64 {
        self.0
    }
}

pub(crate) type ResultMap = Arc<Mutex<BTreeMap<PromiseId, Result<Value, RouterError>>>>;

/// A handle to a call recorded inside a `map()` scope.
///
/// Valid once [`crate::cluster::Cluster::map`] has returned; the Rust
/// substitute for the source's `with cluster.map() as conn:` context
/// manager (spec.md §9 Design Notes).
#[derive(Debug, Clone)]
pub struct PromiseHandle {
    pub(crate) id: PromiseId,
    pub(crate) results: ResultMap,
}

impl PromiseHandle {
    pub fn id(&self) -> PromiseId {
        self.id
    }

    /// The resolved value, or `None` if the call failed.
    pub fn value(&self) -> Option<Value> {
        self.results
            .lock()
            .get(&self.id)
            .and_then(|r| r.clone().ok())
    }

    pub fn error(&self) -> Option<RouterError> {
        self.results
            .lock()
            .get(&self.id)
            .and_then(|r| r.clone().err())
    }

    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }
}
