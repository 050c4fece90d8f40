//! Skeleton builder
//!
//! Materializes a table's structure in two committed mutations: first the
//! table with all of its columns and rows, then a view carrying a shuffled
//! rank for every column and row.

use super::change_set::{ChangeSet, NodeRef};
use super::store::SkeletonStore;
use super::{NodeKind, Predicate, Uid};
use crate::error::{Error, Result};
use crate::metrics;
use crate::view::ViewOrderer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

const TABLE_NAME: &str = "table";
const VIEW_NAME: &str = "view";

fn column_name(i: usize) -> String {
    format!("col{}", i)
}

fn row_name(i: usize) -> String {
    format!("row{}", i)
}

/// Identifiers of a freshly built table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSkeleton {
    pub table_uid: Uid,
    pub column_uids: Vec<Uid>,
    pub row_uids: Vec<Uid>,
    pub view_uid: Uid,
    /// `column_ranks[i]` is the view rank of `column_uids[i]`
    pub column_ranks: Vec<usize>,
    /// `row_ranks[i]` is the view rank of `row_uids[i]`
    pub row_ranks: Vec<usize>,
}

impl TableSkeleton {
    pub fn cell_count(&self) -> usize {
        self.column_uids.len() * self.row_uids.len()
    }
}

/// Builds table skeletons against a [`SkeletonStore`]
pub struct SkeletonBuilder {
    store: Arc<dyn SkeletonStore>,
    orderer: ViewOrderer,
}

impl SkeletonBuilder {
    pub fn new(store: Arc<dyn SkeletonStore>, orderer: ViewOrderer) -> Self {
        Self { store, orderer }
    }

    /// Create the table, its columns and rows, and a shuffled view.
    ///
    /// Any failure is a [`Error::StructuralCommit`]: the store may hold a
    /// table without its view, and must be wiped before retrying.
    #[instrument(skip(self))]
    pub async fn build(&mut self, column_count: usize, row_count: usize) -> Result<TableSkeleton> {
        let started = Instant::now();
        let change_set = table_change_set(column_count, row_count)?;
        let uids = self.commit("table", change_set).await?;

        let table_uid = take_uid(&uids, TABLE_NAME, "table")?;
        let column_uids = (0..column_count)
            .map(|i| take_uid(&uids, &column_name(i), "table"))
            .collect::<Result<Vec<_>>>()?;
        let row_uids = (0..row_count)
            .map(|i| take_uid(&uids, &row_name(i), "table"))
            .collect::<Result<Vec<_>>>()?;
        info!(
            table = %table_uid,
            columns = column_count,
            rows = row_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Created table graph"
        );

        let started = Instant::now();
        let column_ranks = self.orderer.ranks(column_count);
        let row_ranks = self.orderer.ranks(row_count);
        let change_set = view_change_set(&table_uid, &column_uids, &column_ranks, &row_uids, &row_ranks)?;
        let uids = self.commit("view", change_set).await?;
        let view_uid = take_uid(&uids, VIEW_NAME, "view")?;
        info!(
            view = %view_uid,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generated shuffled view"
        );

        Ok(TableSkeleton {
            table_uid,
            column_uids,
            row_uids,
            view_uid,
            column_ranks,
            row_ranks,
        })
    }

    async fn commit(&self, phase: &str, change_set: ChangeSet) -> Result<HashMap<String, Uid>> {
        match self.store.mutate(change_set, true).await {
            Ok(uids) => {
                metrics::record_mutation(phase, true);
                Ok(uids)
            }
            Err(e) => {
                metrics::record_mutation(phase, false);
                error!(phase, error = %e, "Structural mutation failed; skeleton store needs a wipe");
                Err(Error::StructuralCommit {
                    phase: phase.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn take_uid(uids: &HashMap<String, Uid>, name: &str, phase: &str) -> Result<Uid> {
    uids.get(name).cloned().ok_or_else(|| Error::StructuralCommit {
        phase: phase.to_string(),
        reason: format!("store assigned no identifier to '{}'", name),
    })
}

/// Table node plus every column and row, linked from the table
pub fn table_change_set(column_count: usize, row_count: usize) -> Result<ChangeSet> {
    let nodes = 1 + column_count + row_count;
    let mut cs = ChangeSet::with_capacity(nodes, nodes - 1);
    let table = cs.add_node(TABLE_NAME, NodeKind::Table)?;
    for i in 0..column_count {
        let column = cs.add_node(column_name(i), NodeKind::Column)?;
        cs.add_edge(table.clone(), Predicate::HasColumn, column);
    }
    for i in 0..row_count {
        let row = cs.add_node(row_name(i), NodeKind::Row)?;
        cs.add_edge(table.clone(), Predicate::HasRow, row);
    }
    Ok(cs)
}

/// View node linked from the table, with a ranked edge to every column and row
pub fn view_change_set(
    table_uid: &Uid,
    column_uids: &[Uid],
    column_ranks: &[usize],
    row_uids: &[Uid],
    row_ranks: &[usize],
) -> Result<ChangeSet> {
    if column_uids.len() != column_ranks.len() || row_uids.len() != row_ranks.len() {
        return Err(Error::InvalidArgument(
            "every identifier needs exactly one rank".to_string(),
        ));
    }

    let mut cs = ChangeSet::with_capacity(1, 1 + column_uids.len() + row_uids.len());
    let view = cs.add_node(VIEW_NAME, NodeKind::View)?;
    cs.add_edge(NodeRef::Existing(table_uid.clone()), Predicate::HasView, view.clone());
    for (uid, &rank) in column_uids.iter().zip(column_ranks) {
        cs.add_ranked_edge(view.clone(), Predicate::HasColumn, NodeRef::Existing(uid.clone()), rank);
    }
    for (uid, &rank) in row_uids.iter().zip(row_ranks) {
        cs.add_ranked_edge(view.clone(), Predicate::HasRow, NodeRef::Existing(uid.clone()), rank);
    }
    Ok(cs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::MemorySkeletonStore;
    use crate::view::ranks_are_permutation;
    use std::collections::HashSet;

    fn builder(store: &MemorySkeletonStore, seed: u64) -> SkeletonBuilder {
        SkeletonBuilder::new(Arc::new(store.clone()), ViewOrderer::seeded(seed))
    }

    #[tokio::test]
    async fn test_build_assigns_distinct_identifiers() -> Result<()> {
        let store = MemorySkeletonStore::new();
        for (columns, rows) in [(0, 0), (1, 0), (0, 1), (3, 2), (100, 250)] {
            store.wipe_all().await?;
            let skeleton = builder(&store, 3).build(columns, rows).await?;
            assert_eq!(skeleton.column_uids.len(), columns);
            assert_eq!(skeleton.row_uids.len(), rows);

            let mut all: HashSet<&Uid> = HashSet::new();
            all.insert(&skeleton.table_uid);
            all.insert(&skeleton.view_uid);
            all.extend(skeleton.column_uids.iter());
            all.extend(skeleton.row_uids.iter());
            assert_eq!(all.len(), 2 + columns + rows);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_view_is_permutation_of_table() -> Result<()> {
        let store = MemorySkeletonStore::new();
        let skeleton = builder(&store, 11).build(10, 40).await?;
        assert!(ranks_are_permutation(&skeleton.column_ranks, 10));
        assert!(ranks_are_permutation(&skeleton.row_ranks, 40));

        let snapshot = store.query(&skeleton.table_uid, true).await?;
        let view = snapshot.view.expect("view was built");
        assert_eq!(view.view_uid, skeleton.view_uid);

        let view_columns: HashSet<&Uid> = view.column_uids().collect();
        let table_columns: HashSet<&Uid> = skeleton.column_uids.iter().collect();
        assert_eq!(view_columns, table_columns);
        assert_eq!(view.columns.len(), 10);

        let ranks: Vec<usize> = view.rows.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, (0..40).collect::<Vec<_>>());
        for (uid, &rank) in skeleton.row_uids.iter().zip(&skeleton.row_ranks) {
            assert_eq!(&view.rows[rank].uid, uid);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_seeded_builds_share_ordering() -> Result<()> {
        let a = builder(&MemorySkeletonStore::new(), 5).build(8, 8).await?;
        let b = builder(&MemorySkeletonStore::new(), 5).build(8, 8).await?;
        assert_eq!(a.column_ranks, b.column_ranks);
        assert_eq!(a.row_ranks, b.row_ranks);
        Ok(())
    }

    #[tokio::test]
    async fn test_table_mutation_failure_is_structural() {
        let store = MemorySkeletonStore::new();
        store.fail_next_mutations(1);
        let err = builder(&store, 1).build(3, 3).await.unwrap_err();
        match err {
            Error::StructuralCommit { phase, .. } => assert_eq!(phase, "table"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.node_count(), 0);
    }

    #[tokio::test]
    async fn test_view_mutation_failure_leaves_table_behind() -> Result<()> {
        let store = MemorySkeletonStore::new();
        let mut b = builder(&store, 1);
        // Build once so the second build's view mutation can be failed in isolation.
        let first = b.build(2, 2).await?;
        let before = store.node_count();

        let failing = FailSecond::new(store.clone());
        let mut b = SkeletonBuilder::new(Arc::new(failing), ViewOrderer::seeded(2));
        let err = b.build(2, 2).await.unwrap_err();
        assert!(matches!(err, Error::StructuralCommit { ref phase, .. } if phase == "view"));

        // Table nodes of the second build exist without a view.
        assert_eq!(store.node_count(), before + 5);
        assert!(store.query(&first.table_uid, true).await?.view.is_some());
        Ok(())
    }

    /// Lets the first mutation through and fails the second
    struct FailSecond {
        inner: MemorySkeletonStore,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl FailSecond {
        fn new(inner: MemorySkeletonStore) -> Self {
            Self {
                inner,
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl SkeletonStore for FailSecond {
        async fn mutate(&self, change_set: ChangeSet, commit_now: bool) -> Result<HashMap<String, Uid>> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 1 {
                return Err(Error::Skeleton("connection reset".to_string()));
            }
            self.inner.mutate(change_set, commit_now).await
        }

        async fn query(&self, table_uid: &Uid, include_view: bool) -> Result<crate::skeleton::SkeletonSnapshot> {
            self.inner.query(table_uid, include_view).await
        }

        async fn wipe_all(&self) -> Result<()> {
            self.inner.wipe_all().await
        }
    }

    #[test]
    fn test_change_set_shapes() -> Result<()> {
        let cs = table_change_set(3, 2)?;
        assert_eq!(cs.nodes().len(), 6);
        assert_eq!(cs.edges().len(), 5);

        let err = view_change_set(&Uid::new("0x1"), &[Uid::new("0x2")], &[], &[], &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        Ok(())
    }
}
