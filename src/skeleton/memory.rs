//! In-memory skeleton store
//!
//! A small graph held behind a single lock so that every committed change
//! set is applied atomically. Identifiers are minted from a monotonic counter
//! and rendered in hex (`0x1`, `0x2`, ...); they are never reused, not even
//! across [`wipe_all`](SkeletonStore::wipe_all).
//!
//! Fault injection hooks let tests force mutation or query failures.

use super::change_set::{ChangeSet, NodeRef};
use super::store::SkeletonStore;
use super::{NodeKind, Predicate, Ranked, SkeletonSnapshot, Uid, ViewOrder};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct Edge {
    predicate: Predicate,
    target: Uid,
    rank: Option<usize>,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    edges: Vec<Edge>,
}

/// Nodes and edges resolved to identifiers, waiting to be applied
#[derive(Debug, Default)]
struct Resolved {
    nodes: Vec<(Uid, NodeKind)>,
    edges: Vec<(Uid, Edge)>,
}

#[derive(Debug, Default)]
struct Graph {
    nodes: HashMap<Uid, Node>,
    staged: Resolved,
    next_uid: u64,
}

impl Graph {
    fn kind_of(&self, uid: &Uid) -> Option<NodeKind> {
        self.nodes.get(uid).map(|n| n.kind).or_else(|| {
            self.staged
                .nodes
                .iter()
                .find(|(staged, _)| staged == uid)
                .map(|(_, kind)| *kind)
        })
    }

    fn apply(&mut self, resolved: Resolved) {
        for (uid, kind) in resolved.nodes {
            self.nodes.insert(
                uid,
                Node {
                    kind,
                    edges: Vec::new(),
                },
            );
        }
        for (from, edge) in resolved.edges {
            if let Some(node) = self.nodes.get_mut(&from) {
                node.edges.push(edge);
            }
        }
    }
}

/// In-memory graph implementation of [`SkeletonStore`]
#[derive(Clone, Default)]
pub struct MemorySkeletonStore {
    graph: Arc<RwLock<Graph>>,
    committed: Arc<AtomicU64>,
    mutation_faults: Arc<AtomicUsize>,
    query_faults: Arc<AtomicUsize>,
}

impl MemorySkeletonStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed nodes
    pub fn node_count(&self) -> usize {
        self.graph.read().nodes.len()
    }

    /// Number of committed edges
    pub fn edge_count(&self) -> usize {
        self.graph.read().nodes.values().map(|n| n.edges.len()).sum()
    }

    /// Number of mutations that committed
    pub fn committed_mutations(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Make the next `n` mutations fail without applying anything
    pub fn fail_next_mutations(&self, n: usize) {
        self.mutation_faults.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` queries fail
    pub fn fail_next_queries(&self, n: usize) {
        self.query_faults.store(n, Ordering::SeqCst);
    }

    fn resolve(graph: &Graph, change_set: &ChangeSet) -> Result<(Resolved, HashMap<String, Uid>)> {
        let mut assigned = HashMap::with_capacity(change_set.nodes().len());
        let mut kinds = HashMap::with_capacity(change_set.nodes().len());
        let mut resolved = Resolved::default();
        let mut next = graph.next_uid;

        for node in change_set.nodes() {
            next += 1;
            let uid = Uid::new(format!("0x{:x}", next));
            if assigned.insert(node.name.clone(), uid.clone()).is_some() {
                return Err(Error::InvalidArgument(format!(
                    "local node name '{}' appears twice",
                    node.name
                )));
            }
            kinds.insert(uid.clone(), node.kind);
            resolved.nodes.push((uid, node.kind));
        }

        let lookup = |node: &NodeRef| -> Result<(Uid, NodeKind)> {
            match node {
                NodeRef::Local(name) => {
                    let uid = assigned.get(name).ok_or_else(|| {
                        Error::InvalidArgument(format!("edge references unknown local node '{}'", name))
                    })?;
                    Ok((uid.clone(), kinds[uid]))
                }
                NodeRef::Existing(uid) => graph
                    .kind_of(uid)
                    .map(|kind| (uid.clone(), kind))
                    .ok_or_else(|| Error::NotFound(format!("node {}", uid))),
            }
        };

        for edge in change_set.edges() {
            let (from, from_kind) = lookup(&edge.from)?;
            let (to, to_kind) = lookup(&edge.to)?;
            check_edge(from_kind, edge.predicate, to_kind)?;
            resolved.edges.push((
                from,
                Edge {
                    predicate: edge.predicate,
                    target: to,
                    rank: edge.rank,
                },
            ));
        }

        Ok((resolved, assigned))
    }
}

fn check_edge(from: NodeKind, predicate: Predicate, to: NodeKind) -> Result<()> {
    let valid = matches!(
        (from, predicate, to),
        (NodeKind::Table, Predicate::HasColumn, NodeKind::Column)
            | (NodeKind::Table, Predicate::HasRow, NodeKind::Row)
            | (NodeKind::Table, Predicate::HasView, NodeKind::View)
            | (NodeKind::View, Predicate::HasColumn, NodeKind::Column)
            | (NodeKind::View, Predicate::HasRow, NodeKind::Row)
    );
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "{:?} <{}> {:?} is not a valid edge",
            from,
            predicate.name(),
            to
        )))
    }
}

fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn ranked(node: &Node, predicate: Predicate) -> Vec<Ranked> {
    let mut ranked: Vec<Ranked> = node
        .edges
        .iter()
        .filter(|e| e.predicate == predicate)
        .map(|e| Ranked {
            uid: e.target.clone(),
            rank: e.rank.unwrap_or(usize::MAX),
        })
        .collect();
    ranked.sort_by_key(|r| r.rank);
    ranked
}

#[async_trait]
impl SkeletonStore for MemorySkeletonStore {
    async fn mutate(&self, change_set: ChangeSet, commit_now: bool) -> Result<HashMap<String, Uid>> {
        if take_fault(&self.mutation_faults) {
            return Err(Error::Skeleton("injected mutation failure".to_string()));
        }

        let mut graph = self.graph.write();
        let (resolved, assigned) = Self::resolve(&graph, &change_set)?;
        graph.next_uid += change_set.nodes().len() as u64;

        if commit_now {
            let staged = std::mem::take(&mut graph.staged);
            graph.apply(staged);
            graph.apply(resolved);
            self.committed.fetch_add(1, Ordering::Relaxed);
        } else {
            graph.staged.nodes.extend(resolved.nodes);
            graph.staged.edges.extend(resolved.edges);
        }

        debug!(
            nodes = change_set.nodes().len(),
            edges = change_set.edges().len(),
            commit_now,
            "Applied skeleton mutation"
        );
        Ok(assigned)
    }

    async fn query(&self, table_uid: &Uid, include_view: bool) -> Result<SkeletonSnapshot> {
        if take_fault(&self.query_faults) {
            return Err(Error::Skeleton("injected query failure".to_string()));
        }

        let graph = self.graph.read();
        let table = graph
            .nodes
            .get(table_uid)
            .ok_or_else(|| Error::NotFound(format!("table {}", table_uid)))?;
        if table.kind != NodeKind::Table {
            return Err(Error::InvalidArgument(format!(
                "node {} is a {:?}, not a table",
                table_uid, table.kind
            )));
        }

        let targets = |predicate: Predicate| -> Vec<Uid> {
            table
                .edges
                .iter()
                .filter(|e| e.predicate == predicate)
                .map(|e| e.target.clone())
                .collect()
        };

        let view = if include_view {
            targets(Predicate::HasView).first().and_then(|view_uid| {
                graph.nodes.get(view_uid).map(|view| ViewOrder {
                    view_uid: view_uid.clone(),
                    columns: ranked(view, Predicate::HasColumn),
                    rows: ranked(view, Predicate::HasRow),
                })
            })
        } else {
            None
        };

        Ok(SkeletonSnapshot {
            table_uid: table_uid.clone(),
            columns: targets(Predicate::HasColumn),
            rows: targets(Predicate::HasRow),
            view,
        })
    }

    async fn wipe_all(&self) -> Result<()> {
        let mut graph = self.graph.write();
        graph.nodes.clear();
        graph.staged = Resolved::default();
        debug!("Wiped skeleton store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_table() -> ChangeSet {
        let mut cs = ChangeSet::new();
        let table = cs.add_node("table", NodeKind::Table).unwrap();
        for i in 0..2 {
            let col = cs.add_node(format!("col{}", i), NodeKind::Column).unwrap();
            cs.add_edge(table.clone(), Predicate::HasColumn, col);
        }
        let row = cs.add_node("row0", NodeKind::Row).unwrap();
        cs.add_edge(table, Predicate::HasRow, row);
        cs
    }

    #[tokio::test]
    async fn test_mutate_and_query() -> Result<()> {
        let store = MemorySkeletonStore::new();
        let uids = store.mutate(small_table(), true).await?;
        assert_eq!(uids.len(), 4);

        let snapshot = store.query(&uids["table"], false).await?;
        assert_eq!(snapshot.columns, vec![uids["col0"].clone(), uids["col1"].clone()]);
        assert_eq!(snapshot.rows, vec![uids["row0"].clone()]);
        assert!(snapshot.view.is_none());
        assert_eq!(store.committed_mutations(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_local_name_rejected_without_minting() -> Result<()> {
        let store = MemorySkeletonStore::new();
        let mut cs = small_table();
        cs.push_node_unchecked("table", NodeKind::Table);

        let err = store.mutate(cs, true).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(store.node_count(), 0);
        assert_eq!(store.committed_mutations(), 0);

        let uids = store.mutate(small_table(), true).await?;
        assert_eq!(uids["table"], Uid::new("0x1"));
        Ok(())
    }

    #[tokio::test]
    async fn test_view_ranks_sorted() -> Result<()> {
        let store = MemorySkeletonStore::new();
        let uids = store.mutate(small_table(), true).await?;

        let mut cs = ChangeSet::new();
        let view = cs.add_node("view", NodeKind::View).unwrap();
        cs.add_edge(NodeRef::Existing(uids["table"].clone()), Predicate::HasView, view.clone());
        cs.add_ranked_edge(view.clone(), Predicate::HasColumn, NodeRef::Existing(uids["col0"].clone()), 1);
        cs.add_ranked_edge(view.clone(), Predicate::HasColumn, NodeRef::Existing(uids["col1"].clone()), 0);
        cs.add_ranked_edge(view, Predicate::HasRow, NodeRef::Existing(uids["row0"].clone()), 0);
        let view_uids = store.mutate(cs, true).await?;

        let snapshot = store.query(&uids["table"], true).await?;
        let view = snapshot.view.expect("view requested");
        assert_eq!(view.view_uid, view_uids["view"]);
        let order: Vec<&Uid> = view.column_uids().collect();
        assert_eq!(order, vec![&uids["col1"], &uids["col0"]]);
        assert_eq!(view.rows.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_change_set_is_atomic() {
        let store = MemorySkeletonStore::new();
        let mut cs = small_table();
        cs.add_edge(
            NodeRef::local("table"),
            Predicate::HasRow,
            NodeRef::Existing(Uid::new("0xdead")),
        );

        let err = store.mutate(cs, true).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(store.node_count(), 0);
        assert_eq!(store.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_edge_kind_checked() {
        let store = MemorySkeletonStore::new();
        let mut cs = ChangeSet::new();
        let row = cs.add_node("row0", NodeKind::Row).unwrap();
        let col = cs.add_node("col0", NodeKind::Column).unwrap();
        cs.add_edge(row, Predicate::HasColumn, col);

        let err = store.mutate(cs, true).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(store.node_count(), 0);
    }

    #[tokio::test]
    async fn test_staged_mutation_visible_after_commit() -> Result<()> {
        let store = MemorySkeletonStore::new();
        let uids = store.mutate(small_table(), false).await?;
        assert_eq!(store.node_count(), 0);
        assert!(store.query(&uids["table"], false).await.is_err());

        // A later committing mutation may reference staged nodes.
        let mut cs = ChangeSet::new();
        let row = cs.add_node("row1", NodeKind::Row).unwrap();
        cs.add_edge(NodeRef::Existing(uids["table"].clone()), Predicate::HasRow, row);
        store.mutate(cs, true).await?;

        let snapshot = store.query(&uids["table"], false).await?;
        assert_eq!(snapshot.rows.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_injected_faults_and_wipe() -> Result<()> {
        let store = MemorySkeletonStore::new();
        store.fail_next_mutations(1);
        assert!(store.mutate(small_table(), true).await.is_err());
        assert_eq!(store.node_count(), 0);

        let first = store.mutate(small_table(), true).await?;
        store.fail_next_queries(1);
        assert!(store.query(&first["table"], false).await.is_err());
        assert!(store.query(&first["table"], false).await.is_ok());

        store.wipe_all().await?;
        assert_eq!(store.node_count(), 0);
        let second = store.mutate(small_table(), true).await?;
        assert_ne!(first["table"], second["table"]);
        Ok(())
    }
}
