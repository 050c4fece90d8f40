//! Cell filler
//!
//! Fans the skeleton's rows out into one record write per row. Writes run on
//! spawned tasks gated by a semaphore, so at most `concurrency` of them are
//! in flight; each is retried on its own and failures are collected per row.

use super::payload::PayloadSource;
use super::store::CellStore;
use super::{Namespace, Record, WritePolicy};
use crate::error::{Error, Result};
use crate::metrics;
use crate::skeleton::{TableSkeleton, Uid};
use prometheus::IntGauge;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{info, instrument, warn};

/// Filler tuning
#[derive(Debug, Clone)]
pub struct FillOptions {
    /// Maximum writes in flight
    pub concurrency: usize,
    /// Attempts per row, including the first
    pub max_attempts: usize,
    /// Base delay between attempts; attempt `n` waits `n * retry_backoff`
    pub retry_backoff: Duration,
    /// Stop admitting rows after the first permanent failure
    pub fail_fast: bool,
    pub policy: WritePolicy,
}

impl Default for FillOptions {
    fn default() -> Self {
        Self {
            concurrency: 300,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(50),
            fail_fast: false,
            policy: WritePolicy::CreateOrReplace,
        }
    }
}

/// A row whose write exhausted its attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedWrite {
    pub row_uid: Uid,
    pub attempts: usize,
    pub error: String,
}

/// Outcome of a fill: what was written and what was not
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillReport {
    pub succeeded: usize,
    pub failed: Vec<FailedWrite>,
    /// Extra attempts spent on rows that eventually succeeded or failed
    pub retries: usize,
}

impl FillReport {
    /// True when every row was written
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_rows(&self) -> impl Iterator<Item = &Uid> {
        self.failed.iter().map(|f| &f.row_uid)
    }
}

struct WriteOutcome {
    row_uid: Uid,
    attempts: usize,
    result: Result<()>,
}

/// Holds one slot of an in-flight gauge until dropped, including when the
/// owning task panics or is aborted
struct InFlightWrite<'a>(&'a IntGauge);

impl<'a> InFlightWrite<'a> {
    fn enter(gauge: &'a IntGauge) -> Self {
        gauge.inc();
        Self(gauge)
    }
}

impl Drop for InFlightWrite<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Writes skeleton rows into a [`CellStore`]
pub struct CellFiller {
    store: Arc<dyn CellStore>,
    keyspace: String,
    options: FillOptions,
}

impl CellFiller {
    pub fn new(store: Arc<dyn CellStore>, keyspace: impl Into<String>, options: FillOptions) -> Self {
        Self {
            store,
            keyspace: keyspace.into(),
            options,
        }
    }

    pub fn options(&self) -> &FillOptions {
        &self.options
    }

    /// Fill every cell of `skeleton`
    pub async fn fill(&self, skeleton: &TableSkeleton, payload: Arc<dyn PayloadSource>) -> Result<FillReport> {
        self.fill_rows(&skeleton.table_uid, &skeleton.row_uids, &skeleton.column_uids, payload)
            .await
    }

    /// Write one record per row, each mapping every column to its payload.
    ///
    /// Without fail-fast, per-row failures are returned in the report. With
    /// fail-fast, the first permanent failure is returned once in-flight
    /// writes have drained.
    #[instrument(skip(self, row_uids, column_uids, payload), fields(rows = row_uids.len(), columns = column_uids.len()))]
    pub async fn fill_rows(
        &self,
        table_uid: &Uid,
        row_uids: &[Uid],
        column_uids: &[Uid],
        payload: Arc<dyn PayloadSource>,
    ) -> Result<FillReport> {
        if self.options.concurrency == 0 {
            return Err(Error::InvalidArgument("fill concurrency must be > 0".to_string()));
        }
        if self.options.max_attempts == 0 {
            return Err(Error::InvalidArgument("fill max_attempts must be > 0".to_string()));
        }

        let started = Instant::now();
        let namespace = Arc::new(Namespace::new(self.keyspace.clone(), table_uid.as_str()));
        let columns: Arc<[Uid]> = column_uids.into();
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<Id, Uid> = HashMap::new();
        let mut report = FillReport::default();
        let mut first_error: Option<Error> = None;

        for row_uid in row_uids {
            while let Some(joined) = tasks.try_join_next_with_id() {
                self.absorb(joined, &mut pending, &mut report, &mut first_error);
            }
            if first_error.is_some() {
                break;
            }

            // Admission gate: no task exists until a permit is held.
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Internal(format!("fill semaphore closed: {}", e)))?;

            let store = self.store.clone();
            let namespace = namespace.clone();
            let columns = columns.clone();
            let payload = payload.clone();
            let options = self.options.clone();
            let task_row = row_uid.clone();
            let handle = tasks.spawn(async move {
                let _permit = permit;
                let _in_flight = InFlightWrite::enter(&metrics::CELL_WRITES_IN_FLIGHT);
                let row_uid = task_row;
                let record: Record = columns
                    .iter()
                    .map(|column| (column.to_string(), payload.payload(&row_uid, column)))
                    .collect();
                write_with_retry(store.as_ref(), &namespace, row_uid, record, &options).await
            });
            pending.insert(handle.id(), row_uid.clone());
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            self.absorb(joined, &mut pending, &mut report, &mut first_error);
        }

        let elapsed = started.elapsed();
        info!(
            table = %table_uid,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            retries = report.retries,
            elapsed_ms = elapsed.as_millis() as u64,
            "Filled table cells"
        );

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Fold one finished task into the report. A task that panicked counts
    /// as a failed row.
    fn absorb(
        &self,
        joined: std::result::Result<(Id, WriteOutcome), JoinError>,
        pending: &mut HashMap<Id, Uid>,
        report: &mut FillReport,
        first_error: &mut Option<Error>,
    ) {
        let outcome = match joined {
            Ok((id, outcome)) => {
                pending.remove(&id);
                outcome
            }
            Err(e) => {
                let row_uid = pending
                    .remove(&e.id())
                    .unwrap_or_else(|| Uid::new("<unknown>"));
                WriteOutcome {
                    row_uid,
                    attempts: 1,
                    result: Err(Error::Internal(format!("cell write task failed: {}", e))),
                }
            }
        };
        report.retries += outcome.attempts.saturating_sub(1);
        match outcome.result {
            Ok(()) => report.succeeded += 1,
            Err(e) => {
                warn!(row = %outcome.row_uid, attempts = outcome.attempts, error = %e, "Row write failed permanently");
                if self.options.fail_fast && first_error.is_none() {
                    *first_error = Some(Error::CellWrite {
                        row: outcome.row_uid.to_string(),
                        attempts: outcome.attempts,
                        reason: e.to_string(),
                    });
                }
                report.failed.push(FailedWrite {
                    row_uid: outcome.row_uid,
                    attempts: outcome.attempts,
                    error: e.to_string(),
                });
            }
        }
    }
}

async fn write_with_retry(
    store: &dyn CellStore,
    namespace: &Namespace,
    row_uid: Uid,
    record: Record,
    options: &FillOptions,
) -> WriteOutcome {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = store
            .put(namespace, row_uid.as_str(), record.clone(), options.policy)
            .await;
        metrics::record_write(result.is_ok());

        match result {
            Err(e) if e.is_retryable() && attempts < options.max_attempts => {
                warn!(row = %row_uid, attempt = attempts, error = %e, "Retrying row write");
                metrics::record_retry();
                tokio::time::sleep(options.retry_backoff * attempts as u32).await;
            }
            result => {
                return WriteOutcome {
                    row_uid,
                    attempts,
                    result,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::memory::{MemoryCellStore, PERMANENT};
    use crate::cells::payload::FixedText;

    fn uids(prefix: &str, n: usize) -> Vec<Uid> {
        (0..n).map(|i| Uid::new(format!("{}{}", prefix, i))).collect()
    }

    fn options(concurrency: usize) -> FillOptions {
        FillOptions {
            concurrency,
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fill_writes_every_cell() -> Result<()> {
        let store = MemoryCellStore::new();
        let filler = CellFiller::new(Arc::new(store.clone()), "treelab", options(8));
        let (rows, columns) = (uids("r", 20), uids("c", 5));

        let report = filler
            .fill_rows(&Uid::new("0x1"), &rows, &columns, Arc::new(FixedText("v".into())))
            .await?;
        assert_eq!(report.succeeded, 20);
        assert!(report.is_complete());

        let ns = Namespace::new("treelab", "0x1");
        for row in &rows {
            let stored = store.get(&ns, row.as_str()).expect("row written");
            assert_eq!(stored.bins.len(), 5);
            assert!(stored.bins.values().all(|v| v == "v"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() -> Result<()> {
        let store = MemoryCellStore::with_options(100, Duration::from_millis(5));
        let filler = CellFiller::new(Arc::new(store.clone()), "treelab", options(4));

        filler
            .fill_rows(&Uid::new("0x1"), &uids("r", 40), &uids("c", 2), Arc::new(FixedText("v".into())))
            .await?;
        assert!(store.peak_in_flight_puts() <= 4);
        assert!(store.peak_in_flight_puts() >= 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_transient_failure_retried() -> Result<()> {
        let store = MemoryCellStore::new();
        store.fail_key("r3", 2);
        let filler = CellFiller::new(Arc::new(store.clone()), "treelab", options(4));

        let report = filler
            .fill_rows(&Uid::new("0x1"), &uids("r", 10), &uids("c", 2), Arc::new(FixedText("v".into())))
            .await?;
        assert_eq!(report.succeeded, 10);
        assert_eq!(report.retries, 2);
        assert_eq!(store.put_calls(), 12);
        Ok(())
    }

    #[tokio::test]
    async fn test_permanent_failure_reported() -> Result<()> {
        let store = MemoryCellStore::new();
        store.fail_key("r7", PERMANENT);
        let filler = CellFiller::new(Arc::new(store.clone()), "treelab", options(4));

        let report = filler
            .fill_rows(&Uid::new("0x1"), &uids("r", 10), &uids("c", 2), Arc::new(FixedText("v".into())))
            .await?;
        assert_eq!(report.succeeded, 9);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].row_uid, Uid::new("r7"));
        assert_eq!(report.failed[0].attempts, 3);
        assert!(!report.is_complete());
        Ok(())
    }

    #[tokio::test]
    async fn test_fail_fast_returns_first_error() {
        let store = MemoryCellStore::new();
        store.fail_key("r0", PERMANENT);
        let filler = CellFiller::new(
            Arc::new(store.clone()),
            "treelab",
            FillOptions {
                concurrency: 1,
                max_attempts: 1,
                fail_fast: true,
                ..Default::default()
            },
        );

        let err = filler
            .fill_rows(&Uid::new("0x1"), &uids("r", 50), &uids("c", 1), Arc::new(FixedText("v".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CellWrite { ref row, attempts: 1, .. } if row == "r0"));
        // Admission stopped well before every row was dispatched.
        assert!(store.put_calls() < 50);
    }

    #[tokio::test]
    async fn test_create_only_conflict_not_retried() -> Result<()> {
        let store = MemoryCellStore::new();
        let rows = uids("r", 3);
        let columns = uids("c", 1);
        let replace = CellFiller::new(Arc::new(store.clone()), "treelab", options(2));
        replace
            .fill_rows(&Uid::new("0x1"), &rows, &columns, Arc::new(FixedText("a".into())))
            .await?;

        let create_only = CellFiller::new(
            Arc::new(store.clone()),
            "treelab",
            FillOptions {
                policy: WritePolicy::CreateOnly,
                ..options(2)
            },
        );
        let report = create_only
            .fill_rows(&Uid::new("0x1"), &rows, &columns, Arc::new(FixedText("b".into())))
            .await?;
        assert_eq!(report.failed.len(), 3);
        assert!(report.failed.iter().all(|f| f.attempts == 1));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let filler = CellFiller::new(Arc::new(MemoryCellStore::new()), "treelab", options(0));
        let err = filler
            .fill_rows(&Uid::new("0x1"), &uids("r", 1), &uids("c", 1), Arc::new(FixedText("v".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_panicking_payload_counts_as_failed_row() -> Result<()> {
        let store = MemoryCellStore::new();
        let filler = CellFiller::new(Arc::new(store.clone()), "treelab", options(4));
        let payload: Arc<dyn PayloadSource> = Arc::new(|row: &Uid, _column: &Uid| {
            if row.as_str() == "r3" {
                panic!("payload generator failed");
            }
            "v".to_string()
        });

        let report = filler
            .fill_rows(&Uid::new("0x1"), &uids("r", 8), &uids("c", 2), payload)
            .await?;
        assert_eq!(report.succeeded, 7);
        assert_eq!(report.failed_rows().collect::<Vec<_>>(), vec![&Uid::new("r3")]);
        assert_eq!(store.len(), 7);
        Ok(())
    }

    #[tokio::test]
    async fn test_in_flight_gauge_released_on_panic() {
        let gauge: &'static IntGauge =
            Box::leak(Box::new(IntGauge::new("test_fill_in_flight", "in-flight writes").unwrap()));
        let handle = tokio::spawn(async move {
            let _slot = InFlightWrite::enter(gauge);
            assert_eq!(gauge.get(), 1);
            panic!("write task died");
        });
        assert!(handle.await.unwrap_err().is_panic());
        assert_eq!(gauge.get(), 0);

        {
            let _slot = InFlightWrite::enter(gauge);
            assert_eq!(gauge.get(), 1);
        }
        assert_eq!(gauge.get(), 0);
    }
}
