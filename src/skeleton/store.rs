//! Skeleton store trait

use super::{ChangeSet, SkeletonSnapshot, Uid};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Graph-structured store holding table structure.
///
/// Implementations mint identifiers for the local names of a change set and
/// must apply a committed change set atomically.
#[async_trait]
pub trait SkeletonStore: Send + Sync {
    /// Apply a change set and return the identifiers assigned to its local
    /// names. With `commit_now == false` the changes are staged and become
    /// visible once a later mutation commits.
    async fn mutate(&self, change_set: ChangeSet, commit_now: bool) -> Result<HashMap<String, Uid>>;

    /// Read a table's columns and rows, plus its view when `include_view` is set
    async fn query(&self, table_uid: &Uid, include_view: bool) -> Result<SkeletonSnapshot>;

    /// Drop every node and edge
    async fn wipe_all(&self) -> Result<()>;
}
