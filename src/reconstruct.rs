//! Table reconstruction
//!
//! Joins the skeleton and the cell store back into one table:
//!
//! ```text
//! skeleton.query(table) ──→ columns, rows, view?
//!                              │
//!                 rows.chunks(batch_size)
//!                              │
//!            ┌─────────────────┼─────────────────┐
//!       bulk_get(batch 0)  bulk_get(batch 1)  ...        (≤ read_concurrency in flight)
//!            └─────────────────┼─────────────────┘
//!                              ▼
//!                 strip envelopes, merge rows
//! ```
//!
//! Batches are exposed as a pull-based stream so callers can consume rows as
//! they arrive instead of waiting for the whole table.

use crate::cells::{CellStore, Namespace, StoredRecord};
use crate::error::{Error, Result};
use crate::metrics;
use crate::skeleton::{SkeletonStore, Uid, ViewOrder};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Reconstructor tuning
#[derive(Debug, Clone)]
pub struct ReconstructOptions {
    /// Keys per bulk read; must not exceed the cell store's batch limit
    pub batch_size: usize,
    /// Bulk reads in flight at once
    pub read_concurrency: usize,
    /// Attempts per batch, including the first
    pub max_attempts: usize,
    pub retry_backoff: Duration,
    /// Also fetch the view's display order
    pub include_view: bool,
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            read_concurrency: 1,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(50),
            include_view: true,
        }
    }
}

/// One row with its cells, keyed by column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructedRow {
    pub row_uid: Uid,
    pub cells: BTreeMap<Uid, String>,
}

/// A batch whose read exhausted its attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBatch {
    pub index: usize,
    pub row_uids: Vec<Uid>,
    pub error: String,
}

/// Result of reading one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Loaded { index: usize, rows: Vec<ReconstructedRow> },
    Failed(FailedBatch),
}

/// A table joined back together from both stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructedTable {
    pub table_uid: Uid,
    pub columns: Vec<Uid>,
    /// Every skeleton row, in skeleton order
    pub rows: Vec<ReconstructedRow>,
    pub view: Option<ViewOrder>,
    /// Batches that could not be read; their rows carry empty cell maps
    pub failed_batches: Vec<FailedBatch>,
    pub batch_count: usize,
}

impl ReconstructedTable {
    /// True when every batch was read
    pub fn is_complete(&self) -> bool {
        self.failed_batches.is_empty()
    }

    pub fn total_cells(&self) -> usize {
        self.rows.iter().map(|r| r.cells.len()).sum()
    }

    /// Rows that came back without any cell
    pub fn missing_rows(&self) -> impl Iterator<Item = &Uid> {
        self.rows.iter().filter(|r| r.cells.is_empty()).map(|r| &r.row_uid)
    }

    pub fn row(&self, row_uid: &Uid) -> Option<&ReconstructedRow> {
        self.rows.iter().find(|r| &r.row_uid == row_uid)
    }

    /// Columns in view rank order, if the view was fetched
    pub fn ordered_columns(&self) -> Option<Vec<&Uid>> {
        self.view.as_ref().map(|view| view.column_uids().collect())
    }

    /// Rows in view rank order, if the view was fetched
    pub fn ordered_rows(&self) -> Option<Vec<&ReconstructedRow>> {
        let view = self.view.as_ref()?;
        let by_uid: HashMap<&Uid, &ReconstructedRow> = self.rows.iter().map(|r| (&r.row_uid, r)).collect();
        Some(view.row_uids().filter_map(|uid| by_uid.get(uid).copied()).collect())
    }
}

/// Reads a table back out of the skeleton and cell stores
pub struct TableReconstructor {
    skeleton: Arc<dyn SkeletonStore>,
    cells: Arc<dyn CellStore>,
    keyspace: String,
    options: ReconstructOptions,
}

impl TableReconstructor {
    pub fn new(
        skeleton: Arc<dyn SkeletonStore>,
        cells: Arc<dyn CellStore>,
        keyspace: impl Into<String>,
        options: ReconstructOptions,
    ) -> Self {
        Self {
            skeleton,
            cells,
            keyspace: keyspace.into(),
            options,
        }
    }

    pub fn options(&self) -> &ReconstructOptions {
        &self.options
    }

    fn check_batch_size(&self) -> Result<()> {
        let limit = self.cells.batch_limit();
        if self.options.batch_size == 0 {
            return Err(Error::InvalidArgument("batch size must be > 0".to_string()));
        }
        if self.options.batch_size > limit {
            return Err(Error::OversizedBatch {
                requested: self.options.batch_size,
                limit,
            });
        }
        Ok(())
    }

    /// Rebuild `table_uid` from both stores.
    ///
    /// A skeleton failure fails the whole call. Batch read failures are
    /// reported in [`ReconstructedTable::failed_batches`].
    #[instrument(skip(self))]
    pub async fn reconstruct(&self, table_uid: &Uid) -> Result<ReconstructedTable> {
        self.check_batch_size()?;

        let started = Instant::now();
        let snapshot = self.skeleton.query(table_uid, self.options.include_view).await?;
        info!(
            table = %table_uid,
            columns = snapshot.columns.len(),
            rows = snapshot.rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Read table skeleton"
        );

        let started = Instant::now();
        let columns: Arc<HashSet<Uid>> = Arc::new(snapshot.columns.iter().cloned().collect());
        let mut loaded: HashMap<Uid, BTreeMap<Uid, String>> = HashMap::with_capacity(snapshot.rows.len());
        let mut failed_batches = Vec::new();
        let mut batch_count = 0;

        let mut batches = self.batches(table_uid, &snapshot.rows, columns)?;
        while let Some(outcome) = batches.next().await {
            batch_count += 1;
            match outcome {
                BatchOutcome::Loaded { index, rows } => {
                    debug!(batch = index, rows = rows.len(), "Merged batch");
                    loaded.extend(rows.into_iter().map(|r| (r.row_uid, r.cells)));
                }
                BatchOutcome::Failed(failed) => failed_batches.push(failed),
            }
        }
        drop(batches);
        failed_batches.sort_by_key(|f: &FailedBatch| f.index);

        let rows: Vec<ReconstructedRow> = snapshot
            .rows
            .iter()
            .map(|uid| ReconstructedRow {
                row_uid: uid.clone(),
                cells: loaded.remove(uid).unwrap_or_default(),
            })
            .collect();

        let table = ReconstructedTable {
            table_uid: table_uid.clone(),
            columns: snapshot.columns,
            rows,
            view: snapshot.view,
            failed_batches,
            batch_count,
        };

        if table.is_complete() {
            info!(
                table = %table_uid,
                batches = batch_count,
                cells = table.total_cells(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Read table cells"
            );
        } else {
            warn!(
                table = %table_uid,
                batches = batch_count,
                failed_batches = table.failed_batches.len(),
                "Table only partially reconstructed"
            );
        }
        Ok(table)
    }

    /// Lazily read `row_uids` in batches of `batch_size`.
    ///
    /// Nothing is read until the stream is polled. Cells for fields outside
    /// `columns` are dropped.
    pub fn batches<'a>(
        &'a self,
        table_uid: &Uid,
        row_uids: &[Uid],
        columns: Arc<HashSet<Uid>>,
    ) -> Result<BoxStream<'a, BatchOutcome>> {
        self.check_batch_size()?;

        let namespace = Arc::new(Namespace::new(self.keyspace.clone(), table_uid.as_str()));
        let chunks: Vec<Vec<Uid>> = row_uids
            .chunks(self.options.batch_size)
            .map(<[Uid]>::to_vec)
            .collect();

        Ok(stream::iter(chunks.into_iter().enumerate())
            .map(move |(index, rows)| {
                let namespace = namespace.clone();
                let columns = columns.clone();
                async move { self.read_batch(index, &namespace, rows, &columns).await }
            })
            .buffer_unordered(self.options.read_concurrency.max(1))
            .boxed())
    }

    async fn read_batch(
        &self,
        index: usize,
        namespace: &Namespace,
        rows: Vec<Uid>,
        columns: &HashSet<Uid>,
    ) -> BatchOutcome {
        let keys: Vec<String> = rows.iter().map(Uid::to_string).collect();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.cells.bulk_get(namespace, &keys).await {
                Ok(records) => {
                    metrics::record_batch_read(true);
                    let requested: HashSet<&Uid> = rows.iter().collect();
                    return BatchOutcome::Loaded {
                        index,
                        rows: strip_envelopes(namespace, records, &requested, columns),
                    };
                }
                Err(e) if e.is_retryable() && attempts < self.options.max_attempts.max(1) => {
                    metrics::record_batch_read(false);
                    warn!(batch = index, attempt = attempts, error = %e, "Retrying batch read");
                    tokio::time::sleep(self.options.retry_backoff * attempts as u32).await;
                }
                Err(e) => {
                    metrics::record_batch_read(false);
                    let error = Error::BatchRead {
                        batch: index,
                        reason: e.to_string(),
                    };
                    warn!(batch = index, rows = rows.len(), error = %error, "Batch read failed");
                    return BatchOutcome::Failed(FailedBatch {
                        index,
                        row_uids: rows,
                        error: error.to_string(),
                    });
                }
            }
        }
    }
}

fn strip_envelopes(
    namespace: &Namespace,
    records: Vec<StoredRecord>,
    requested: &HashSet<&Uid>,
    columns: &HashSet<Uid>,
) -> Vec<ReconstructedRow> {
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let row_uid = Uid::new(record.key.user_key);
        if record.key.namespace != *namespace || !requested.contains(&row_uid) {
            warn!(row = %row_uid, "Ignoring record that was not requested");
            continue;
        }

        let total = record.bins.len();
        let cells: BTreeMap<Uid, String> = record
            .bins
            .into_iter()
            .filter(|(field, _)| columns.contains(field.as_str()))
            .map(|(field, value)| (Uid::new(field), value))
            .collect();
        if cells.len() < total {
            warn!(row = %row_uid, dropped = total - cells.len(), "Dropped cells for unknown columns");
        }
        rows.push(ReconstructedRow { row_uid, cells });
    }
    rows
}
