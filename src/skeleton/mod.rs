//! Skeleton layer
//!
//! # Architecture
//!
//! The skeleton is the structural graph of a table, without any cell content:
//!
//! ```text
//! Table (uid)
//!   ├─→ has_column → Column (uid)        x C
//!   ├─→ has_row    → Row (uid)           x R
//!   └─→ has_view   → View (uid)
//!                      ├─→ has_column → Column (order = rank)
//!                      └─→ has_row    → Row    (order = rank)
//! ```
//!
//! Identifiers are minted by the skeleton store when a change set is
//! committed. Callers refer to not-yet-created nodes by local names
//! (`table`, `col17`, `row42`, `view`) and receive the assigned [`Uid`]s back.

pub mod builder;
pub mod change_set;
pub mod memory;
pub mod store;

pub use builder::{SkeletonBuilder, TableSkeleton};
pub use change_set::{ChangeSet, EdgeRequest, NodeRef, NodeRequest};
pub use memory::MemorySkeletonStore;
pub use store::SkeletonStore;

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque identifier assigned by the skeleton store.
///
/// Never interpreted structurally; it is only used as a lookup key in both
/// stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Uid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Uid {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Uid {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Node type in the skeleton graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Table,
    Column,
    Row,
    View,
}

impl NodeKind {
    /// Type name as stored on the node (`dgraph.type`)
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Table => "Table",
            NodeKind::Column => "Column",
            NodeKind::Row => "Row",
            NodeKind::View => "View",
        }
    }
}

/// Edge predicate in the skeleton graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Predicate {
    HasColumn,
    HasRow,
    HasView,
}

impl Predicate {
    pub fn name(&self) -> &'static str {
        match self {
            Predicate::HasColumn => "has_column",
            Predicate::HasRow => "has_row",
            Predicate::HasView => "has_view",
        }
    }
}

/// An identifier tagged with its display rank inside a view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranked {
    pub uid: Uid,
    pub rank: usize,
}

/// Ranked column and row sequences of a view, sorted by rank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewOrder {
    pub view_uid: Uid,
    pub columns: Vec<Ranked>,
    pub rows: Vec<Ranked>,
}

impl ViewOrder {
    pub fn column_uids(&self) -> impl Iterator<Item = &Uid> {
        self.columns.iter().map(|r| &r.uid)
    }

    pub fn row_uids(&self) -> impl Iterator<Item = &Uid> {
        self.rows.iter().map(|r| &r.uid)
    }
}

/// Result of querying the skeleton store for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonSnapshot {
    pub table_uid: Uid,
    pub columns: Vec<Uid>,
    pub rows: Vec<Uid>,
    pub view: Option<ViewOrder>,
}
