//! Storage engines for counters and gauges.
//!
//! Three backends implement [`StorageEngine`] with the same update rules:
//! [`MemoryStore`] keeps everything in a locked map, [`FileDumpStore`] adds
//! flat-file snapshots on top of it and [`RelationalStore`] persists to a
//! SQL database through SeaORM.

pub mod entities;
pub mod error;
pub mod file;
pub mod memory;
pub mod relational;


pub use error::{Result, StorageError};
pub use file::FileDumpStore;
pub use memory::MemoryStore;
pub use relational::RelationalStore;

use async_trait::async_trait;
use telemon_common::types::{Metric, MetricKey, MetricKind, RawValue};

/// Persistence backend for metrics.
///
/// Implementations are shared between the HTTP and gRPC handlers, so they
/// must be `Send + Sync`.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Inserts a new metric. Fails with [`StorageError::AlreadyExists`] when
    /// the key is taken; the stored value is left untouched.
    async fn add(&self, metric: Metric) -> Result<()>;

    /// Applies `input` to an existing metric with the per-kind rule and
    /// returns the new state. Never creates.
    async fn update(&self, key: &MetricKey, input: &RawValue) -> Result<Metric>;

    /// Looks up a metric. A lookup with the wrong kind is not-found.
    async fn retrieve(&self, kind: MetricKind, name: &str) -> Result<Metric>;

    /// All metrics, ordered by kind then name.
    async fn retrieve_all(&self) -> Result<Vec<Metric>>;

    /// Upserts every item: the item's value is applied as an update to the
    /// stored metric, creating it first when missing. Returns the resulting
    /// state of each item in input order.
    async fn update_batch(&self, metrics: &[Metric]) -> Result<Vec<Metric>>;

    /// Liveness check of the underlying backend.
    async fn ping(&self) -> Result<()> {
        Err(StorageError::Unsupported("ping"))
    }
}
