//! Query execution contract
//!
//! The association engine never talks to a database directly. Everything it needs is
//! expressed as a [`SelectPlan`], a [`BatchFind`] or a [`WriteOp`] and handed to a
//! [`QueryExecutor`].

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value as JsonValue;

use super::plan::{BatchFind, Row, SelectPlan, WriteOp};
use crate::error::OrmResult;

/// Identifier length limit used when an executor does not report one
pub const DEFAULT_TABLE_ALIAS_LENGTH: usize = 63;

/// Executes query plans and returns rows labelled by their select-list labels
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute a SELECT plan and return its rows in result order
    async fn execute_plan(&self, plan: &SelectPlan) -> OrmResult<Vec<Row>>;

    /// Execute one chunk of a batched lookup
    ///
    /// Callers go through [`find_in_batches`], which guarantees `find.keys` never exceeds
    /// [`max_ids_in_list`](Self::max_ids_in_list).
    async fn batch_find(&self, find: &BatchFind) -> OrmResult<Vec<Row>> {
        self.execute_plan(&find.to_plan()).await
    }

    /// Execute a write and return the number of affected rows
    async fn execute_write(&self, op: &WriteOp) -> OrmResult<u64>;

    /// Maximum number of values in one IN list; `None` when unbounded
    fn max_ids_in_list(&self) -> Option<usize> {
        None
    }

    /// Maximum length of a table alias
    fn table_alias_length(&self) -> usize {
        DEFAULT_TABLE_ALIAS_LENGTH
    }
}

/// Run a batched lookup, slicing its keys into chunks of at most `limit` values
///
/// One query is issued per chunk and the rows are concatenated in chunk order. With
/// `parallel` set the chunk queries are issued concurrently; results are still fully
/// collected before they are returned.
pub async fn find_in_batches(
    executor: &dyn QueryExecutor,
    find: &BatchFind,
    limit: Option<usize>,
    parallel: bool,
) -> OrmResult<Vec<Row>> {
    if find.keys.is_empty() {
        return Ok(Vec::new());
    }

    let chunk_size = limit
        .filter(|limit| *limit > 0)
        .unwrap_or(find.keys.len());
    let chunks: Vec<BatchFind> = find
        .keys
        .chunks(chunk_size)
        .map(|chunk| find.with_keys(chunk.to_vec()))
        .collect();

    tracing::debug!(
        "Batch lookup on {} for {} keys in {} chunk(s)",
        find.plan.from.name,
        find.keys.len(),
        chunks.len()
    );

    if parallel && chunks.len() > 1 {
        let results = try_join_all(chunks.iter().map(|chunk| executor.batch_find(chunk))).await?;
        return Ok(results.into_iter().flatten().collect());
    }

    let mut rows = Vec::new();
    for chunk in &chunks {
        rows.extend(executor.batch_find(chunk).await?);
    }
    Ok(rows)
}

/// Remove duplicate key values while keeping first-seen order
pub(crate) fn unique_keys(values: impl IntoIterator<Item = JsonValue>) -> Vec<JsonValue> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|value| match crate::record::key_of(value) {
            Some(key) => seen.insert(key),
            None => false,
        })
        .collect()
}
