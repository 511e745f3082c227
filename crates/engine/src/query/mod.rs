//! Datastore queries over the document store
//!
//! - `model`: query descriptors and result pages
//! - `planner`: validation, `!=`/`IN` expansion and native prefilters
//! - `evaluator`: reference-order matching, sort values and projections
//! - `executor`: the end-to-end pipeline with cursors and paging

pub mod evaluator;
pub mod executor;
pub mod model;
pub mod planner;

pub use executor::QueryExecutor;
pub use model::{
    Direction, Operator, PropertyFilter, Query, QueryResult, QueryResultItem, SortOrder,
};
pub use planner::{QueryPlan, MAX_BRANCHES};
