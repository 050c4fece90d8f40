//! Benchmark runner
//!
//! Drives one full run of the hybrid protocol:
//!
//! 1. clear both stores
//! 2. build the table skeleton and its shuffled view
//! 3. fill every cell
//! 4. reconstruct the table and validate it (optional)
//!
//! Every phase is timed, logged and recorded in the phase-duration histogram.

use crate::cells::{CellFiller, CellStore, FillReport, MemoryCellStore, PayloadSource, RandomText, SeededText};
use crate::config::BenchConfig;
use crate::error::Result;
use crate::metrics;
use crate::reconstruct::{FailedBatch, ReconstructedTable, TableReconstructor};
use crate::skeleton::{MemorySkeletonStore, SkeletonBuilder, SkeletonStore, TableSkeleton, Uid};
use crate::view::ViewOrderer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Wall time of one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructionSummary {
    pub rows: usize,
    pub batches: usize,
    pub total_cells: usize,
    pub failed_batches: Vec<FailedBatch>,
}

/// Comparison of a reconstructed table against the skeleton it was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub expected_rows: usize,
    pub present_rows: usize,
    /// Rows holding a cell for every column
    pub complete_rows: usize,
    pub expected_cells: usize,
    pub total_cells: usize,
    /// Rows missing at least one cell
    pub missing_rows: Vec<Uid>,
    pub failed_batches: usize,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.present_rows == self.expected_rows
            && self.total_cells == self.expected_cells
            && self.failed_batches == 0
    }
}

/// Check `table` against `skeleton`
pub fn validate(skeleton: &TableSkeleton, table: &ReconstructedTable) -> ValidationReport {
    let columns = skeleton.column_uids.len();
    let missing_rows: Vec<Uid> = table
        .rows
        .iter()
        .filter(|r| r.cells.len() < columns)
        .map(|r| r.row_uid.clone())
        .collect();

    ValidationReport {
        expected_rows: skeleton.row_uids.len(),
        present_rows: table.rows.len(),
        complete_rows: table.rows.len() - missing_rows.len(),
        expected_cells: skeleton.cell_count(),
        total_cells: table.total_cells(),
        missing_rows,
        failed_batches: table.failed_batches.len(),
    }
}

/// Summary of one benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub table_uid: Uid,
    pub view_uid: Uid,
    pub column_count: usize,
    pub row_count: usize,
    pub fill: FillReport,
    pub reconstruction: Option<ReconstructionSummary>,
    pub validation: Option<ValidationReport>,
    pub phases: Vec<PhaseTiming>,
}

impl RunReport {
    /// Every row written and, if validated, every cell read back
    pub fn succeeded(&self) -> bool {
        self.fill.is_complete() && self.validation.as_ref().map_or(true, ValidationReport::passed)
    }

    pub fn phase_ms(&self, phase: &str) -> Option<u64> {
        self.phases.iter().find(|p| p.phase == phase).map(|p| p.elapsed_ms)
    }
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    pub skeleton: TableSkeleton,
    pub table: Option<ReconstructedTable>,
}

/// Runs the benchmark against a pair of stores
pub struct BenchmarkRunner {
    skeleton: Arc<dyn SkeletonStore>,
    cells: Arc<dyn CellStore>,
    config: BenchConfig,
}

impl BenchmarkRunner {
    pub fn new(skeleton: Arc<dyn SkeletonStore>, cells: Arc<dyn CellStore>, config: BenchConfig) -> Self {
        Self {
            skeleton,
            cells,
            config,
        }
    }

    /// Runner over fresh in-memory stores shaped by `config.store`
    pub fn with_memory_stores(config: BenchConfig) -> Self {
        let cells = MemoryCellStore::with_options(config.store.batch_limit, config.store_latency());
        Self::new(Arc::new(MemorySkeletonStore::new()), Arc::new(cells), config)
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Seeded payloads when a seed is configured, fresh random text otherwise
    pub fn default_payload(&self) -> Arc<dyn PayloadSource> {
        match self.config.seed {
            Some(seed) => Arc::new(SeededText {
                len: self.config.payload_len,
                seed,
            }),
            None => Arc::new(RandomText {
                len: self.config.payload_len,
            }),
        }
    }

    /// Clear both stores, build, fill and (optionally) reconstruct one table
    #[instrument(skip(self, payload), fields(columns = self.config.columns, rows = self.config.rows))]
    pub async fn run(&self, payload: Arc<dyn PayloadSource>) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut phases = Vec::new();
        info!(%run_id, "Starting benchmark run");

        timed(&mut phases, "clear", async {
            self.cells.truncate(&self.config.keyspace).await?;
            self.skeleton.wipe_all().await
        })
        .await?;

        let mut builder = SkeletonBuilder::new(self.skeleton.clone(), ViewOrderer::new(self.config.seed));
        let skeleton = timed(
            &mut phases,
            "build_skeleton",
            builder.build(self.config.columns, self.config.rows),
        )
        .await?;

        let filler = CellFiller::new(self.cells.clone(), self.config.keyspace.clone(), self.config.fill_options());
        let fill = timed(&mut phases, "fill", filler.fill(&skeleton, payload)).await?;
        if !fill.is_complete() {
            warn!(
                failed = fill.failed.len(),
                "Table only partially filled; rerun the fill to repair it"
            );
        }

        let (table, reconstruction, validation) = if self.config.reconstruct.enabled {
            let reconstructor = TableReconstructor::new(
                self.skeleton.clone(),
                self.cells.clone(),
                self.config.keyspace.clone(),
                self.config.reconstruct_options(),
            );
            let table = timed(&mut phases, "reconstruct", reconstructor.reconstruct(&skeleton.table_uid)).await?;
            let summary = ReconstructionSummary {
                rows: table.rows.len(),
                batches: table.batch_count,
                total_cells: table.total_cells(),
                failed_batches: table.failed_batches.clone(),
            };
            let validation = validate(&skeleton, &table);
            info!(
                total_cells = validation.total_cells,
                expected_cells = validation.expected_cells,
                passed = validation.passed(),
                "Validated reconstructed table"
            );
            (Some(table), Some(summary), Some(validation))
        } else {
            (None, None, None)
        };

        let report = RunReport {
            run_id,
            started_at,
            table_uid: skeleton.table_uid.clone(),
            view_uid: skeleton.view_uid.clone(),
            column_count: skeleton.column_uids.len(),
            row_count: skeleton.row_uids.len(),
            fill,
            reconstruction,
            validation,
            phases,
        };
        info!(%run_id, succeeded = report.succeeded(), "Benchmark run finished");

        Ok(RunOutcome {
            report,
            skeleton,
            table,
        })
    }
}

async fn timed<T, F>(phases: &mut Vec<PhaseTiming>, phase: &str, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = work.await;
    let elapsed = started.elapsed();
    metrics::observe_phase(phase, elapsed.as_secs_f64());
    info!(phase, elapsed_ms = elapsed.as_millis() as u64, ok = result.is_ok(), "Phase finished");
    phases.push(PhaseTiming {
        phase: phase.to_string(),
        elapsed_ms: elapsed.as_millis() as u64,
    });
    result
}
