#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::RwLock;
use rowgate::AccessEngine;
use rowgate::cell::CellValue;
use rowgate::config::RowgateConfig;
use rowgate::error::RowgateError;
use rowgate::provider::{
    DocData, MatchInput, MatchPredicate, PredicateError, RuleCompiler, StoreFetcher,
};
use rowgate::session::{Role, Session};
use rowgate::table::{TableData, TableQuery};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory document contents.
#[derive(Default)]
pub struct MemDoc {
    tables: RwLock<BTreeMap<String, Arc<TableData>>>,
}

impl MemDoc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, data: TableData) {
        self.tables
            .write()
            .insert(data.table_id.clone(), Arc::new(data));
    }
}

impl DocData for MemDoc {
    fn table(&self, table_id: &str) -> Option<Arc<TableData>> {
        self.tables.read().get(table_id).cloned()
    }
}

/// In-memory authoritative store with a fetch counter.
#[derive(Default)]
pub struct MemStore {
    tables: RwLock<BTreeMap<String, TableData>>,
    pub fetches: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, data: TableData) {
        self.tables.write().insert(data.table_id.clone(), data);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreFetcher for MemStore {
    async fn fetch_table(&self, query: &TableQuery) -> Result<TableData, RowgateError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.read();
        let Some(src) = tables.get(&query.table_id) else {
            return Err(RowgateError::TableNotFound(query.table_id.clone()));
        };
        let mut out = TableData::new(&query.table_id);
        out.columns = src.columns.keys().map(|c| (c.clone(), Vec::new())).collect();
        'rows: for row in 0..src.len() {
            for (col, wanted) in &query.filters {
                let value = if col == "id" {
                    CellValue::Int(src.row_ids[row])
                } else {
                    src.cell(col, row).cloned().unwrap_or(CellValue::Null)
                };
                if !wanted.contains(&value) {
                    continue 'rows;
                }
            }
            out.row_ids.push(src.row_ids[row]);
            for (col, values) in &src.columns {
                out.columns
                    .get_mut(col)
                    .expect("column prepared above")
                    .push(values[row].clone());
            }
        }
        Ok(out)
    }
}

type PredicateFn = dyn Fn(&MatchInput<'_>) -> Result<bool, PredicateError> + Send + Sync;

struct ClosurePredicate(Arc<PredicateFn>);

impl MatchPredicate for ClosurePredicate {
    fn matches(&self, input: &MatchInput<'_>) -> Result<bool, PredicateError> {
        (self.0)(input)
    }
}

/// Test stand-in for the external formula compiler: formulas are registered
/// up front as closures, keyed by their exact source text.
#[derive(Default)]
pub struct TestCompiler {
    rules: HashMap<String, Arc<dyn MatchPredicate>>,
}

impl TestCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, source: &str, f: F) -> Self
    where
        F: Fn(&MatchInput<'_>) -> Result<bool, PredicateError> + Send + Sync + 'static,
    {
        self.rules.insert(
            source.to_string(),
            Arc::new(ClosurePredicate(Arc::new(f))),
        );
        self
    }
}

impl RuleCompiler for TestCompiler {
    fn compile(&self, source: &str) -> Result<Arc<dyn MatchPredicate>, RowgateError> {
        self.rules
            .get(source)
            .cloned()
            .ok_or_else(|| RowgateError::Predicate(format!("unknown formula '{source}'")))
    }
}

/// Conventional leading rule that keeps document owners unrestricted even
/// under row-level rules.
pub const OWNER_ACCESS_RULE: &str = "user.Access == 'owners'";

pub fn access_is_owners() -> impl Fn(&MatchInput<'_>) -> Result<bool, PredicateError> {
    |input: &MatchInput<'_>| Ok(input.user.access == Role::Owners)
}

/// Predicate body for "`col` of the record equals the user's email"; raises
/// needs-row without a record.
pub fn owner_is_user(col: &'static str) -> impl Fn(&MatchInput<'_>) -> Result<bool, PredicateError>
{
    move |input: &MatchInput<'_>| {
        let Some(rec) = input.rec else {
            return Err(PredicateError::NeedsRow);
        };
        let email = input
            .user
            .email
            .as_deref()
            .map_or(CellValue::Null, CellValue::text);
        Ok(rec.get(col) == email)
    }
}

pub fn table(table_id: &str, row_ids: &[i64], cols: &[(&str, Vec<CellValue>)]) -> TableData {
    let mut t = TableData::new(table_id);
    t.row_ids = row_ids.to_vec();
    for (col, values) in cols {
        assert_eq!(values.len(), row_ids.len(), "ragged column {col}");
        t.columns.insert((*col).to_string(), values.clone());
    }
    t
}

pub fn texts(values: &[&str]) -> Vec<CellValue> {
    values.iter().map(|v| CellValue::text(v)).collect()
}

pub fn resources_table(rows: &[(i64, &str, &str)]) -> TableData {
    let mut t = TableData::new("_meta_AccessResources");
    for (id, table_id, col_ids) in rows {
        t.row_ids.push(*id);
        t.columns
            .entry("tableId".into())
            .or_default()
            .push(CellValue::text(table_id));
        t.columns
            .entry("colIds".into())
            .or_default()
            .push(CellValue::text(col_ids));
    }
    t
}

/// (row id, resource ref, formula, permissions, position, user attributes)
pub type RuleRowSpec<'a> = (i64, i64, &'a str, &'a str, f64, &'a str);

pub fn rules_table(rows: &[RuleRowSpec<'_>]) -> TableData {
    let mut t = TableData::new("_meta_AccessRules");
    for (id, resource, formula, perms, pos, attrs) in rows {
        t.row_ids.push(*id);
        t.columns
            .entry("resource".into())
            .or_default()
            .push(CellValue::Reference(*resource));
        t.columns
            .entry("aclFormula".into())
            .or_default()
            .push(CellValue::text(formula));
        t.columns
            .entry("permissionsText".into())
            .or_default()
            .push(CellValue::text(perms));
        t.columns
            .entry("rulePos".into())
            .or_default()
            .push(CellValue::Float(*pos));
        t.columns
            .entry("userAttributes".into())
            .or_default()
            .push(CellValue::text(attrs));
    }
    t
}

pub fn owner_session(id: u64) -> Session {
    Session::new(id, Role::Owners).with_user(1, "owner@example.com", "Owner")
}

pub fn editor_session(id: u64, email: &str) -> Session {
    Session::new(id, Role::Editors).with_user(id as i64, email, email)
}

pub fn viewer_session(id: u64, email: &str) -> Session {
    Session::new(id, Role::Viewers).with_user(id as i64, email, email)
}

pub struct TestEnv {
    pub doc: Arc<MemDoc>,
    pub store: Arc<MemStore>,
    pub engine: AccessEngine,
}

pub fn env(doc: MemDoc, store: MemStore, compiler: TestCompiler) -> TestEnv {
    let doc = Arc::new(doc);
    let store = Arc::new(store);
    let engine = AccessEngine::new(
        Arc::clone(&doc) as Arc<dyn DocData>,
        Arc::clone(&store) as Arc<dyn StoreFetcher>,
        Arc::new(compiler),
        RowgateConfig::quiet(),
    );
    TestEnv { doc, store, engine }
}
