//! Seams to the rest of the document server. The engine owns none of these
//! concerns: document contents, authoritative storage, and the rule formula
//! compiler are all injected at construction.

use crate::error::RowgateError;
use crate::table::{RecordView, TableData, TableQuery};
use crate::user::UserInfo;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Query interface over the document's current table contents.
pub trait DocData: Send + Sync {
    fn table(&self, table_id: &str) -> Option<Arc<TableData>>;
}

/// Async fetch of a filtered table snapshot from the authoritative store.
#[async_trait]
pub trait StoreFetcher: Send + Sync {
    async fn fetch_table(&self, query: &TableQuery) -> Result<TableData, RowgateError>;
}

#[derive(Debug, Clone, Error)]
pub enum PredicateError {
    /// The predicate references record fields but no record was supplied.
    #[error("row data required")]
    NeedsRow,
    #[error("{0}")]
    Failed(String),
}

/// Input to a compiled match predicate.
#[derive(Clone, Copy)]
pub struct MatchInput<'a> {
    pub user: &'a UserInfo,
    pub rec: Option<&'a RecordView<'a>>,
}

/// A compiled rule formula. Must be pure: the evaluator caches results keyed
/// only on (session, rule set).
pub trait MatchPredicate: Send + Sync {
    fn matches(&self, input: &MatchInput<'_>) -> Result<bool, PredicateError>;
}

/// Compiles rule source text into a match predicate. Compilation failures are
/// configuration errors and surface from `AccessEngine::update`.
pub trait RuleCompiler: Send + Sync {
    fn compile(&self, source: &str) -> Result<Arc<dyn MatchPredicate>, RowgateError>;
}
