//! Structured skeleton mutations
//!
//! A [`ChangeSet`] is a list of typed node and edge creation requests. It is
//! the only way to describe a structural write; adapters turn it into their
//! store's wire format (see [`ChangeSet::to_nquads`] for the RDF form).

use super::{NodeKind, Predicate, Uid};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Endpoint of an edge request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRef {
    /// A node created by the same change set
    Local(String),
    /// A node that already exists in the store
    Existing(Uid),
}

impl NodeRef {
    pub fn local(name: impl Into<String>) -> Self {
        NodeRef::Local(name.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRequest {
    pub name: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRequest {
    pub from: NodeRef,
    pub predicate: Predicate,
    pub to: NodeRef,
    /// Display rank carried as an edge attribute (view membership only)
    pub rank: Option<usize>,
}

/// Builder for a batch of structural changes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "ChangeSetRepr")]
pub struct ChangeSet {
    nodes: Vec<NodeRequest>,
    edges: Vec<EdgeRequest>,
    #[serde(skip)]
    names: HashSet<String>,
}

#[derive(Deserialize)]
struct ChangeSetRepr {
    nodes: Vec<NodeRequest>,
    #[serde(default)]
    edges: Vec<EdgeRequest>,
}

impl TryFrom<ChangeSetRepr> for ChangeSet {
    type Error = Error;

    fn try_from(repr: ChangeSetRepr) -> Result<Self> {
        let mut cs = ChangeSet::with_capacity(repr.nodes.len(), repr.edges.len());
        for node in repr.nodes {
            cs.add_node(node.name, node.kind)?;
        }
        cs.edges = repr.edges;
        Ok(cs)
    }
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size for a known number of nodes and edges
    pub fn with_capacity(nodes: usize, edges: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(nodes),
            edges: Vec::with_capacity(edges),
            names: HashSet::with_capacity(nodes),
        }
    }

    /// Request a new node under a local name unique within this change set
    pub fn add_node(&mut self, name: impl Into<String>, kind: NodeKind) -> Result<NodeRef> {
        let name = name.into();
        if !self.names.insert(name.clone()) {
            return Err(Error::AlreadyExists(format!("local node name '{}'", name)));
        }
        self.nodes.push(NodeRequest {
            name: name.clone(),
            kind,
        });
        Ok(NodeRef::Local(name))
    }

    /// Append a node without the local-name check
    #[cfg(test)]
    pub(crate) fn push_node_unchecked(&mut self, name: &str, kind: NodeKind) {
        self.nodes.push(NodeRequest {
            name: name.to_string(),
            kind,
        });
    }

    pub fn add_edge(&mut self, from: NodeRef, predicate: Predicate, to: NodeRef) {
        self.edges.push(EdgeRequest {
            from,
            predicate,
            to,
            rank: None,
        });
    }

    pub fn add_ranked_edge(&mut self, from: NodeRef, predicate: Predicate, to: NodeRef, rank: usize) {
        self.edges.push(EdgeRequest {
            from,
            predicate,
            to,
            rank: Some(rank),
        });
    }

    pub fn nodes(&self) -> &[NodeRequest] {
        &self.nodes
    }

    pub fn edges(&self) -> &[EdgeRequest] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Total number of requests (nodes + edges)
    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }

    /// Render as RDF N-Quads in the Dgraph dialect.
    ///
    /// ```text
    /// _:table <dgraph.type> "Table" .
    /// _:table <has_column> _:col0 .
    /// _:view <has_row> <0x5> (order=3) .
    /// ```
    pub fn to_nquads(&self) -> String {
        let mut out = String::with_capacity(self.len() * 40);
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "_:{} <dgraph.type> \"{}\" .",
                node.name,
                node.kind.type_name()
            );
        }
        for edge in &self.edges {
            let _ = write!(
                out,
                "{} <{}> {}",
                render_ref(&edge.from),
                edge.predicate.name(),
                render_ref(&edge.to)
            );
            if let Some(rank) = edge.rank {
                let _ = write!(out, " (order={})", rank);
            }
            out.push_str(" .\n");
        }
        out
    }
}

fn render_ref(node: &NodeRef) -> String {
    match node {
        NodeRef::Local(name) => format!("_:{}", name),
        NodeRef::Existing(uid) => format!("<{}>", uid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_local_name_rejected() {
        let mut cs = ChangeSet::new();
        cs.add_node("table", NodeKind::Table).unwrap();
        let err = cs.add_node("table", NodeKind::Table).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(cs.nodes().len(), 1);
    }

    #[test]
    fn test_deserialized_set_keeps_name_check() {
        let mut cs = ChangeSet::new();
        let table = cs.add_node("table", NodeKind::Table).unwrap();
        let row = cs.add_node("row0", NodeKind::Row).unwrap();
        cs.add_edge(table, Predicate::HasRow, row);

        let json = serde_json::to_string(&cs).unwrap();
        let mut restored: ChangeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.nodes(), cs.nodes());
        assert_eq!(restored.edges(), cs.edges());
        let err = restored.add_node("table", NodeKind::Table).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_deserialize_rejects_duplicate_names() {
        let json = r#"{"nodes":[{"name":"table","kind":"Table"},{"name":"table","kind":"Table"}],"edges":[]}"#;
        assert!(serde_json::from_str::<ChangeSet>(json).is_err());
    }

    #[test]
    fn test_nquads_rendering() {
        let mut cs = ChangeSet::new();
        let table = cs.add_node("table", NodeKind::Table).unwrap();
        let col = cs.add_node("col0", NodeKind::Column).unwrap();
        cs.add_edge(table, Predicate::HasColumn, col);
        let view = cs.add_node("view", NodeKind::View).unwrap();
        cs.add_edge(
            NodeRef::Existing(Uid::new("0x1")),
            Predicate::HasView,
            view.clone(),
        );
        cs.add_ranked_edge(view, Predicate::HasRow, NodeRef::Existing(Uid::new("0x5")), 3);

        let nquads = cs.to_nquads();
        let lines: Vec<&str> = nquads.lines().collect();
        assert_eq!(
            lines,
            vec![
                "_:table <dgraph.type> \"Table\" .",
                "_:col0 <dgraph.type> \"Column\" .",
                "_:view <dgraph.type> \"View\" .",
                "_:table <has_column> _:col0 .",
                "<0x1> <has_view> _:view .",
                "_:view <has_row> <0x5> (order=3) .",
            ]
        );
        assert_eq!(cs.len(), 6);
    }
}
