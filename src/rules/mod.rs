pub mod load;
pub mod store;

use crate::error::RowgateError;
use crate::lattice::{Perm, PermBit, PermissionSet};
use crate::provider::{MatchInput, MatchPredicate, PredicateError};
use crate::session::Role;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

/// One compiled access rule: a match predicate over `{user, record?}`, the
/// source formula it came from, and the permission delta it contributes.
/// A rule without a predicate always matches (authored with an empty formula,
/// it acts as the trailing default of its rule set).
#[derive(Clone)]
pub struct Rule {
    pub predicate: Option<Arc<dyn MatchPredicate>>,
    pub source: String,
    pub permissions: PermissionSet,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("source", &self.source)
            .field("permissions", &self.permissions)
            .field("always_matches", &self.predicate.is_none())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleScope {
    Doc,
    Table(String),
    Columns(String, Vec<String>),
}

impl RuleScope {
    pub fn table_id(&self) -> Option<&str> {
        match self {
            RuleScope::Doc => None,
            RuleScope::Table(t) | RuleScope::Columns(t, _) => Some(t),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RuleScope::Doc => "*:*".to_string(),
            RuleScope::Table(t) => format!("{t}:*"),
            RuleScope::Columns(t, cols) => format!("{t}:{}", cols.join(",")),
        }
    }
}

/// An ordered body of rules under one scope, plus the default permissions
/// merged after the body.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Store-assigned identity; the evaluator memo is keyed on it.
    pub id: u32,
    pub scope: RuleScope,
    pub body: Vec<Rule>,
    pub default: PermissionSet,
}

/// Parses permission text: `all`, `none`, or `+`/`-` segments over the
/// letters CRUDS (create, read, update, delete, schemaEdit).
pub fn parse_permissions(text: &str) -> Result<PermissionSet, RowgateError> {
    let text = text.trim();
    if text == "all" {
        return Ok(PermissionSet::uniform(Perm::Allow));
    }
    if text == "none" {
        return Ok(PermissionSet::uniform(Perm::Deny));
    }
    let mut out = PermissionSet::empty();
    let mut mode: Option<Perm> = None;
    for ch in text.chars() {
        match ch {
            '+' => mode = Some(Perm::Allow),
            '-' => mode = Some(Perm::Deny),
            letter => {
                let bit = match letter {
                    'C' => PermBit::Create,
                    'R' => PermBit::Read,
                    'U' => PermBit::Update,
                    'D' => PermBit::Delete,
                    'S' => PermBit::SchemaEdit,
                    other => {
                        return Err(RowgateError::InvalidConfig(format!(
                            "unknown permission letter '{other}' in '{text}'"
                        )));
                    }
                };
                let Some(mode) = mode else {
                    return Err(RowgateError::InvalidConfig(format!(
                        "permission letter before +/- in '{text}'"
                    )));
                };
                out.set(bit, mode);
            }
        }
    }
    Ok(out)
}

struct RoleMatch {
    roles: &'static [Role],
}

impl MatchPredicate for RoleMatch {
    fn matches(&self, input: &MatchInput<'_>) -> Result<bool, PredicateError> {
        Ok(self.roles.contains(&input.user.access))
    }
}

/// Synthetic rules appended after user rules in the document-default rule
/// set: owners and editors hold every permission, viewers read only. User
/// rules precede these and therefore override them.
pub(crate) static BUILTIN_DEFAULT_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let full_access: Arc<dyn MatchPredicate> = Arc::new(RoleMatch {
        roles: &[Role::Owners, Role::Editors],
    });
    let view_access: Arc<dyn MatchPredicate> = Arc::new(RoleMatch {
        roles: &[Role::Viewers],
    });
    let mut read_only = PermissionSet::uniform(Perm::Deny);
    read_only.set(PermBit::Read, Perm::Allow);
    vec![
        Rule {
            predicate: Some(full_access),
            source: "user.Access in ['owners', 'editors']".to_string(),
            permissions: PermissionSet::uniform(Perm::Allow),
        },
        Rule {
            predicate: Some(view_access),
            source: "user.Access in ['viewers']".to_string(),
            permissions: read_only,
        },
    ]
});


pub use self::store::{RuleStore, RuleStoreBuilder};
