use crate::error::RowgateError;
use crate::lattice::{Perm, PermissionSet};
use crate::rules::{BUILTIN_DEFAULT_RULES, Rule, RuleScope, RuleSet};
use std::collections::HashSet;
use std::sync::Arc;

/// Indexed collection of compiled rule sets, keyed by (table, column) scope.
/// Immutable once built; a reload constructs a fresh store and swaps it in,
/// so concurrent evaluators always see a consistent index.
#[derive(Debug, Clone)]
pub struct RuleStore {
    doc_default: Arc<RuleSet>,
    table_defaults: im::HashMap<String, Arc<RuleSet>>,
    columns: im::HashMap<(String, String), Arc<RuleSet>>,
    column_sets: im::HashMap<String, Vec<Arc<RuleSet>>>,
    have_rules: bool,
}

impl RuleStore {
    /// A store with no user-authored rules: just the built-in defaults.
    pub fn empty() -> Self {
        RuleStoreBuilder::new()
            .finish()
            .unwrap_or_else(|_| unreachable!("empty store cannot be ill-formed"))
    }

    pub fn column_rule_set(&self, table_id: &str, col_id: &str) -> Option<&Arc<RuleSet>> {
        self.columns
            .get(&(table_id.to_string(), col_id.to_string()))
    }

    /// Every column-scoped rule set on the table, in authoring order.
    pub fn all_column_rule_sets(&self, table_id: &str) -> &[Arc<RuleSet>] {
        self.column_sets
            .get(table_id)
            .map_or(&[], Vec::as_slice)
    }

    pub fn table_default_rule_set(&self, table_id: &str) -> Option<&Arc<RuleSet>> {
        self.table_defaults.get(table_id)
    }

    pub fn doc_default_rule_set(&self) -> &Arc<RuleSet> {
        &self.doc_default
    }

    /// Tables that carry any rule set, sorted.
    pub fn all_table_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .table_defaults
            .keys()
            .map(String::as_str)
            .chain(self.column_sets.keys().map(String::as_str))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// True iff any user-authored rule set exists. When false, all row and
    /// column filtering is skipped entirely.
    pub fn have_rules(&self) -> bool {
        self.have_rules
    }
}

/// Accumulates scoped rule bodies, validates them, and produces an immutable
/// store. Scope problems (doc scope with specific columns, duplicate
/// defaults, overlapping column scopes) surface here, before the swap.
pub struct RuleStoreBuilder {
    doc_body: Vec<Rule>,
    table_defaults: Vec<(String, Vec<Rule>)>,
    column_scopes: Vec<(String, Vec<String>, Vec<Rule>)>,
    seen: HashSet<RuleScope>,
    have_rules: bool,
}

impl RuleStoreBuilder {
    pub fn new() -> Self {
        Self {
            doc_body: Vec::new(),
            table_defaults: Vec::new(),
            column_scopes: Vec::new(),
            seen: HashSet::new(),
            have_rules: false,
        }
    }

    pub fn add_rule_set(&mut self, scope: RuleScope, body: Vec<Rule>) -> Result<(), RowgateError> {
        if !self.seen.insert(scope.clone()) {
            return Err(RowgateError::InvalidConfig(format!(
                "duplicate rule set for scope {}",
                scope.describe()
            )));
        }
        match scope {
            RuleScope::Doc => {
                self.doc_body = body;
            }
            RuleScope::Table(table_id) => {
                if self.table_defaults.iter().any(|(t, _)| *t == table_id) {
                    return Err(RowgateError::InvalidConfig(format!(
                        "duplicate table default rule set for '{table_id}'"
                    )));
                }
                self.table_defaults.push((table_id, body));
            }
            RuleScope::Columns(table_id, cols) => {
                if cols.is_empty() {
                    return Err(RowgateError::InvalidConfig(format!(
                        "empty column list in rule scope for '{table_id}'"
                    )));
                }
                self.column_scopes.push((table_id, cols, body));
            }
        }
        self.have_rules = true;
        Ok(())
    }

    pub fn finish(self) -> Result<RuleStore, RowgateError> {
        let mut next_id = 0u32;
        let mut assign = || {
            let id = next_id;
            next_id += 1;
            id
        };

        let mut doc_body = self.doc_body;
        doc_body.extend(BUILTIN_DEFAULT_RULES.iter().cloned());
        let doc_default = Arc::new(RuleSet {
            id: assign(),
            scope: RuleScope::Doc,
            body: doc_body,
            default: PermissionSet::uniform(Perm::Deny),
        });

        let mut table_defaults = im::HashMap::new();
        for (table_id, body) in self.table_defaults {
            let rule_set = Arc::new(RuleSet {
                id: assign(),
                scope: RuleScope::Table(table_id.clone()),
                body,
                default: PermissionSet::empty(),
            });
            table_defaults.insert(table_id, rule_set);
        }

        let mut columns = im::HashMap::new();
        let mut column_sets: im::HashMap<String, Vec<Arc<RuleSet>>> = im::HashMap::new();
        for (table_id, cols, body) in self.column_scopes {
            let rule_set = Arc::new(RuleSet {
                id: assign(),
                scope: RuleScope::Columns(table_id.clone(), cols.clone()),
                body,
                default: PermissionSet::empty(),
            });
            for col in &cols {
                let key = (table_id.clone(), col.clone());
                if columns.contains_key(&key) {
                    return Err(RowgateError::InvalidConfig(format!(
                        "column '{col}' of '{table_id}' appears in more than one rule scope"
                    )));
                }
                columns.insert(key, Arc::clone(&rule_set));
            }
            column_sets
                .entry(table_id)
                .or_insert_with(Vec::new)
                .push(rule_set);
        }

        Ok(RuleStore {
            doc_default,
            table_defaults,
            columns,
            column_sets,
            have_rules: self.have_rules,
        })
    }
}

impl Default for RuleStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
