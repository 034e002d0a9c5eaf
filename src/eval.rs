use crate::lattice::{
    MixedPermissionSet, PermissionSet, TablePermissionSet, TableRead, Verdict, fold_doc, fold_table,
};
use crate::provider::{MatchInput, PredicateError};
use crate::rules::{RuleSet, RuleStore};
use crate::table::RecordView;
use crate::user::UserInfo;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Per-session permission evaluator.
///
/// Record-less verdicts are memoized per rule-set chain; the memo key is the
/// id of the most specific rule set in the chain, which fully determines the
/// fallback layering. Record-bound evaluation bypasses the memo entirely
/// (the record would permeate every key) and is kept short-lived by callers.
pub struct PermissionInfo {
    rules: Arc<RuleStore>,
    user: UserInfo,
    memo: Mutex<HashMap<u32, MixedPermissionSet>>,
    log_rule_errors: bool,
}

impl PermissionInfo {
    pub fn new(rules: Arc<RuleStore>, user: UserInfo, log_rule_errors: bool) -> Self {
        Self {
            rules,
            user,
            memo: Mutex::new(HashMap::new()),
            log_rule_errors,
        }
    }

    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    /// Runs one rule set body in order, first match dominating via the merge
    /// operator. A predicate that needs a missing row contributes its delta
    /// weakened to the row-dependent flags; any other predicate failure is a
    /// non-match. The set's default merges last.
    fn eval_rule_set(&self, rule_set: &RuleSet, rec: Option<&RecordView<'_>>) -> PermissionSet {
        let mut acc = PermissionSet::empty();
        for rule in &rule_set.body {
            let matched = match &rule.predicate {
                None => Ok(true),
                Some(predicate) => predicate.matches(&MatchInput {
                    user: &self.user,
                    rec,
                }),
            };
            match matched {
                Ok(true) => acc = acc.merge(rule.permissions),
                Ok(false) => {}
                Err(PredicateError::NeedsRow) => acc = acc.merge(rule.permissions.weaken()),
                Err(PredicateError::Failed(message)) => {
                    if self.log_rule_errors {
                        warn!(
                            formula = rule.source.as_str(),
                            scope = rule_set.scope.describe().as_str(),
                            error = message.as_str(),
                            "rule predicate failed; treated as non-match"
                        );
                    }
                }
            }
        }
        acc.merge(rule_set.default)
    }

    fn eval_chain(
        &self,
        chain: &[&Arc<RuleSet>],
        rec: Option<&RecordView<'_>>,
    ) -> MixedPermissionSet {
        let memo_key = match (rec, chain.first()) {
            (None, Some(leaf)) => {
                if let Some(hit) = self.memo.lock().get(&leaf.id) {
                    return *hit;
                }
                Some(leaf.id)
            }
            _ => None,
        };
        let mut acc = PermissionSet::empty();
        for rule_set in chain {
            acc = acc.merge(self.eval_rule_set(rule_set, rec));
        }
        let mixed = acc.to_mixed();
        if let Some(key) = memo_key {
            self.memo.lock().insert(key, mixed);
        }
        mixed
    }

    fn column_chain<'s>(&'s self, table_id: &str, col_id: &str) -> Vec<&'s Arc<RuleSet>> {
        let mut chain = Vec::with_capacity(3);
        if let Some(rule_set) = self.rules.column_rule_set(table_id, col_id) {
            chain.push(rule_set);
        }
        self.push_defaults(table_id, &mut chain);
        chain
    }

    fn push_defaults<'s>(&'s self, table_id: &str, chain: &mut Vec<&'s Arc<RuleSet>>) {
        if let Some(rule_set) = self.rules.table_default_rule_set(table_id) {
            chain.push(rule_set);
        }
        chain.push(self.rules.doc_default_rule_set());
    }

    pub fn column_access(&self, table_id: &str, col_id: &str) -> MixedPermissionSet {
        self.eval_chain(&self.column_chain(table_id, col_id), None)
    }

    pub fn column_access_with(
        &self,
        table_id: &str,
        col_id: &str,
        rec: &RecordView<'_>,
    ) -> MixedPermissionSet {
        self.eval_chain(&self.column_chain(table_id, col_id), Some(rec))
    }

    fn table_verdicts(
        &self,
        table_id: &str,
        rec: Option<&RecordView<'_>>,
    ) -> Vec<MixedPermissionSet> {
        let mut default_chain = Vec::with_capacity(2);
        self.push_defaults(table_id, &mut default_chain);
        let mut verdicts = vec![self.eval_chain(&default_chain, rec)];
        for rule_set in self.rules.all_column_rule_sets(table_id) {
            let mut chain = Vec::with_capacity(3);
            chain.push(rule_set);
            self.push_defaults(table_id, &mut chain);
            verdicts.push(self.eval_chain(&chain, rec));
        }
        verdicts
    }

    pub fn table_access(&self, table_id: &str) -> TablePermissionSet {
        fold_table(&self.table_verdicts(table_id, None))
    }

    pub fn table_access_with(&self, table_id: &str, rec: &RecordView<'_>) -> TablePermissionSet {
        fold_table(&self.table_verdicts(table_id, Some(rec)))
    }

    /// Whether the given row projection is readable at all.
    pub fn row_forbidden(&self, table_id: &str, rec: &RecordView<'_>) -> bool {
        self.table_access_with(table_id, rec).read == TableRead::Deny
    }

    pub fn doc_access(&self) -> MixedPermissionSet {
        let mut doc_chain = Vec::with_capacity(1);
        doc_chain.push(self.rules.doc_default_rule_set());
        let doc_default = self.eval_chain(&doc_chain, None);
        let tables: Vec<TablePermissionSet> = self
            .rules
            .all_table_ids()
            .into_iter()
            .map(|table_id| self.table_access(table_id))
            .collect();
        fold_doc(doc_default, &tables)
    }

    pub fn can_read_everything(&self) -> bool {
        self.doc_access().read() == Verdict::Allow
    }

    pub fn has_full_access(&self) -> bool {
        self.doc_access().is_uniformly(Verdict::Allow)
    }
}
