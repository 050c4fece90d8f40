//! Cell layer
//!
//! # Architecture
//!
//! Cell values live in a key-addressed store that knows nothing about table
//! structure. Each row of the skeleton becomes one record:
//!
//! ```text
//! (keyspace, table_uid)             namespace
//!   └─→ row_uid                     record key
//!        ├─→ column_uid_0 → "x8Jq..."   bin
//!        ├─→ column_uid_1 → "pL0z..."
//!        └─→ ...
//! ```
//!
//! The store wraps records in an envelope ([`StoredRecord`]) carrying the
//! full key and a write generation; readers strip it.

pub mod filler;
pub mod memory;
pub mod payload;
pub mod store;

pub use filler::{CellFiller, FailedWrite, FillOptions, FillReport};
pub use memory::MemoryCellStore;
pub use payload::{FixedText, PayloadSource, RandomText, SeededText};
pub use store::CellStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field name → cell text
pub type Record = BTreeMap<String, String>;

/// Keyspace plus set; one set per table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub keyspace: String,
    pub set: String,
}

impl Namespace {
    pub fn new(keyspace: impl Into<String>, set: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            set: set.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.keyspace, self.set)
    }
}

/// Fully qualified record key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub namespace: Namespace,
    pub user_key: String,
}

/// Record as returned by the store, inside its key envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: RecordKey,
    /// Incremented on every successful write of the key
    pub generation: u32,
    pub bins: Record,
}

/// How a put treats an existing record at the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Overwrite the whole record
    #[default]
    CreateOrReplace,
    /// Merge bins into the existing record
    Update,
    /// Fail if the record exists
    CreateOnly,
}
