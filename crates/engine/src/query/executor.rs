//! Query execution
//!
//! Pipeline: plan, native find, decode, build rows, sort, cut at the
//! cursors, skip the offset, take the limit, shape the page.
//!
//! Cost: only exact plans (key-order queries with no property filters,
//! sorts or projection) push `offset + limit + 1` and the start cursor
//! down to the store. Every other plan fetches and decodes the whole
//! prefiltered candidate set, because the store's native order and
//! matching differ from the reference order and a native limit could cut
//! rows that belong on the page. Memory and latency therefore grow with
//! the number of candidates the prefilter lets through, not with the
//! page size.

use crate::codec::EntityCodec;
use crate::config::AdapterConfig;
use crate::cursor::{Cursor, CursorCodec, CursorPosition};
use crate::error::Result;
use crate::query::evaluator::{compare_positions, compare_rows, rows_for, shape_entity, Row};
use crate::query::model::{Query, QueryResult, QueryResultItem};
use crate::query::planner::{self, QueryPlan};
use crate::retry::read_with_retries;
use mantle_storage::DocumentStore;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Runs queries against one application database
pub struct QueryExecutor {
    store: Arc<dyn DocumentStore>,
    db: String,
    codec: EntityCodec,
    read_retries: u32,
    max_results: usize,
    max_offset: usize,
}

impl QueryExecutor {
    /// Executor for `config.app_id`
    pub fn new(store: Arc<dyn DocumentStore>, config: &AdapterConfig, codec: EntityCodec) -> Self {
        Self {
            store,
            db: config.app_id.clone(),
            codec,
            read_retries: config.read_retries,
            max_results: config.max_query_results,
            max_offset: config.max_query_offset,
        }
    }

    /// Run a query and return one page of results
    ///
    /// Without a limit the page holds at most `max_query_results` items;
    /// the offset is clamped to `max_query_offset`.
    ///
    /// # Errors
    ///
    /// `BadQuery` for invalid queries, `Decode`/`InvalidCursor` for
    /// unusable cursors, `Storage` when the find fails after retries.
    pub fn run(&self, query: &Query) -> Result<QueryResult> {
        let plan = planner::plan(query)?;
        let start = position(&plan, query.start_cursor.as_ref())?;
        let end = position(&plan, query.end_cursor.as_ref())?;
        let offset = query.offset.min(self.max_offset);
        let limit = query.limit.unwrap_or(self.max_results);
        let fetch = offset.checked_add(limit).and_then(|n| n.checked_add(1));

        let rows = self.matching_rows(&plan, start.as_ref(), end.as_ref(), fetch)?;
        let mut remaining = rows.into_iter();
        let skipped: Vec<Row> = remaining.by_ref().take(offset).collect();
        let page: Vec<Row> = remaining.by_ref().take(limit).collect();
        let more_results = remaining.next().is_some();

        let items = page
            .iter()
            .map(|row| {
                Ok(QueryResultItem {
                    entity: shape_entity(&plan, row),
                    cursor: cursor_for(&plan, row)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let end_cursor = match (items.last(), skipped.last()) {
            (Some(item), _) => Some(item.cursor.clone()),
            (None, Some(row)) => Some(cursor_for(&plan, row)?),
            (None, None) => query.start_cursor.clone(),
        };

        debug!(
            target: "mantle::query",
            kind = %plan.kind,
            returned = items.len(),
            skipped = skipped.len(),
            more_results,
            exact = plan.exact,
            "Query completed"
        );
        Ok(QueryResult {
            items,
            end_cursor,
            more_results,
            skipped_results: skipped.len(),
        })
    }

    /// Number of results a query would return without a limit
    ///
    /// Cursors and the (clamped) offset apply; the limit does not.
    pub fn count(&self, query: &Query) -> Result<usize> {
        let plan = planner::plan(query)?;
        let start = position(&plan, query.start_cursor.as_ref())?;
        let end = position(&plan, query.end_cursor.as_ref())?;
        let offset = query.offset.min(self.max_offset);
        let rows = self.matching_rows(&plan, start.as_ref(), end.as_ref(), None)?;
        let count = rows.len().saturating_sub(offset);
        debug!(target: "mantle::query", kind = %plan.kind, count, "Count completed");
        Ok(count)
    }

    // Sorted rows strictly after `start` and up to `end` inclusive.
    fn matching_rows(
        &self,
        plan: &QueryPlan,
        start: Option<&CursorPosition>,
        end: Option<&CursorPosition>,
        fetch_limit: Option<usize>,
    ) -> Result<Vec<Row>> {
        if plan.branches.is_empty() {
            return Ok(Vec::new());
        }
        let find = plan.native_query(start, fetch_limit);
        let docs = read_with_retries(self.read_retries, "find", || {
            self.store.find(&self.db, &plan.kind, &find)
        })?;

        let mut rows = Vec::with_capacity(docs.len());
        for doc in &docs {
            let entity = self.codec.from_record(doc)?;
            rows.extend(rows_for(plan, &entity));
        }
        rows.sort_by(|a, b| compare_rows(plan, a, b));
        rows.retain(|row| {
            start.map_or(true, |p| after(plan, row, p)) && end.map_or(true, |p| !after(plan, row, p))
        });
        Ok(rows)
    }
}

fn after(plan: &QueryPlan, row: &Row, position: &CursorPosition) -> bool {
    compare_positions(plan, &row.tuple, &row.entity.key, &position.tuple, &position.key)
        == Ordering::Greater
}

fn position(plan: &QueryPlan, cursor: Option<&Cursor>) -> Result<Option<CursorPosition>> {
    cursor
        .map(|c| CursorCodec::decode_for(c, plan.shape, plan.arity(), plan.key_direction))
        .transpose()
}

fn cursor_for(plan: &QueryPlan, row: &Row) -> Result<Cursor> {
    CursorCodec::encode(&CursorPosition {
        shape: plan.shape,
        tuple: row.tuple.clone(),
        key: row.entity.key.clone(),
        direction: plan.key_direction,
    })
}
