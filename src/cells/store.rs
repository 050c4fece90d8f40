//! Cell store trait

use super::{Namespace, Record, StoredRecord, WritePolicy};
use crate::error::Result;
use async_trait::async_trait;

/// Key-addressed, bulk-capable store holding row records.
#[async_trait]
pub trait CellStore: Send + Sync {
    /// Maximum number of keys a single [`bulk_get`](CellStore::bulk_get) accepts
    fn batch_limit(&self) -> usize;

    async fn put(&self, namespace: &Namespace, key: &str, record: Record, policy: WritePolicy) -> Result<()>;

    /// Read many records at once. Keys with no record are absent from the
    /// result; result order is unspecified. More than
    /// [`batch_limit`](CellStore::batch_limit) keys is rejected with
    /// [`Error::OversizedBatch`](crate::error::Error::OversizedBatch).
    async fn bulk_get(&self, namespace: &Namespace, keys: &[String]) -> Result<Vec<StoredRecord>>;

    /// Drop every record in every set of `keyspace`
    async fn truncate(&self, keyspace: &str) -> Result<()>;
}
