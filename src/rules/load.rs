use crate::cell::{CellValue, RowId};
use crate::config::RowgateConfig;
use crate::error::RowgateError;
use crate::provider::{DocData, RuleCompiler, StoreFetcher};
use crate::rules::{Rule, RuleScope, RuleStore, RuleStoreBuilder, parse_permissions};
use crate::table::{TableData, TableQuery};
use crate::user::{BUILTIN_USER_KEYS, CharacteristicTable, UserAttributeRule};
use std::collections::BTreeMap;
use tracing::warn;

/// Rule metadata tables. `_meta_AccessResources` declares scopes;
/// `_meta_AccessRules` holds the ordered rules (or user-attribute
/// declarations) attached to them.
pub const RESOURCES_TABLE: &str = "_meta_AccessResources";
pub const RULES_TABLE: &str = "_meta_AccessRules";

#[derive(Debug)]
pub struct LoadedRules {
    pub store: RuleStore,
    pub attr_rules: Vec<UserAttributeRule>,
}

fn text_cell(table: &TableData, col: &str, row: usize) -> String {
    match table.cell(col, row) {
        Some(CellValue::Text(s)) => s.to_string(),
        _ => String::new(),
    }
}

fn ref_cell(table: &TableData, col: &str, row: usize) -> RowId {
    match table.cell(col, row) {
        Some(CellValue::Reference(r)) => *r,
        Some(CellValue::Int(i)) => *i,
        _ => 0,
    }
}

fn float_cell(table: &TableData, col: &str, row: usize) -> f64 {
    match table.cell(col, row) {
        Some(CellValue::Float(f)) => *f,
        Some(CellValue::Int(i)) => *i as f64,
        _ => 0.0,
    }
}

fn parse_scope(table_id: &str, col_ids: &str) -> Result<RuleScope, RowgateError> {
    match (table_id, col_ids) {
        ("*", "*") => Ok(RuleScope::Doc),
        ("*", cols) => Err(RowgateError::InvalidConfig(format!(
            "document-level rule scope cannot name columns '{cols}'"
        ))),
        (table, "*") => Ok(RuleScope::Table(table.to_string())),
        (table, cols) => {
            let cols: Vec<String> = cols
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
            Ok(RuleScope::Columns(table.to_string(), cols))
        }
    }
}

/// Reads the rule metadata tables and compiles them into a fresh store plus
/// the user-attribute declarations. Any error leaves the caller's current
/// store untouched.
pub fn load_rules(
    doc: &dyn DocData,
    compiler: &dyn RuleCompiler,
    config: &RowgateConfig,
) -> Result<LoadedRules, RowgateError> {
    let Some(resources) = doc.table(RESOURCES_TABLE) else {
        return Ok(LoadedRules {
            store: RuleStore::empty(),
            attr_rules: Vec::new(),
        });
    };

    let mut scopes: BTreeMap<RowId, RuleScope> = BTreeMap::new();
    for row in 0..resources.len() {
        let table_id = text_cell(&resources, "tableId", row);
        let col_ids = text_cell(&resources, "colIds", row);
        if table_id.is_empty() {
            continue;
        }
        scopes.insert(resources.row_ids[row], parse_scope(&table_id, &col_ids)?);
    }

    struct RuleRow {
        row_id: RowId,
        resource: RowId,
        formula: String,
        permissions: String,
        attrs: String,
        pos: f64,
    }

    let mut rows: Vec<RuleRow> = Vec::new();
    if let Some(rules) = doc.table(RULES_TABLE) {
        for row in 0..rules.len() {
            rows.push(RuleRow {
                row_id: rules.row_ids[row],
                resource: ref_cell(&rules, "resource", row),
                formula: text_cell(&rules, "aclFormula", row),
                permissions: text_cell(&rules, "permissionsText", row),
                attrs: text_cell(&rules, "userAttributes", row),
                pos: float_cell(&rules, "rulePos", row),
            });
        }
    }
    rows.sort_by(|a, b| a.pos.total_cmp(&b.pos).then(a.row_id.cmp(&b.row_id)));

    if rows.len() > config.max_rule_count {
        return Err(RowgateError::InvalidConfig(format!(
            "rule count {} exceeds maximum {}",
            rows.len(),
            config.max_rule_count
        )));
    }

    let mut attr_rules: Vec<UserAttributeRule> = Vec::new();
    let mut bodies: BTreeMap<RowId, Vec<Rule>> = BTreeMap::new();
    for row in rows {
        if !row.attrs.trim().is_empty() {
            let rule: UserAttributeRule = serde_json::from_str(&row.attrs).map_err(|err| {
                RowgateError::InvalidConfig(format!("bad user attribute declaration: {err}"))
            })?;
            if BUILTIN_USER_KEYS.contains(&rule.name.as_str()) {
                warn!(
                    name = rule.name.as_str(),
                    "user attribute shadows a built-in user field; dropped"
                );
                continue;
            }
            if attr_rules.iter().any(|r| r.name == rule.name) {
                return Err(RowgateError::InvalidConfig(format!(
                    "duplicate user attribute '{}'",
                    rule.name
                )));
            }
            attr_rules.push(rule);
            continue;
        }

        let Some(scope) = scopes.get(&row.resource) else {
            return Err(RowgateError::InvalidConfig(format!(
                "rule row {} references unknown resource {}",
                row.row_id, row.resource
            )));
        };
        let permissions = parse_permissions(&row.permissions)?;
        let predicate = if row.formula.trim().is_empty() {
            None
        } else {
            let compiled =
                compiler
                    .compile(&row.formula)
                    .map_err(|err| RowgateError::InvalidRule {
                        scope: scope.describe(),
                        message: err.to_string(),
                    })?;
            Some(compiled)
        };
        bodies.entry(row.resource).or_default().push(Rule {
            predicate,
            source: row.formula,
            permissions,
        });
    }

    if attr_rules.len() > config.max_attribute_rules {
        return Err(RowgateError::InvalidConfig(format!(
            "attribute rule count {} exceeds maximum {}",
            attr_rules.len(),
            config.max_attribute_rules
        )));
    }

    let mut builder = RuleStoreBuilder::new();
    for row in 0..resources.len() {
        let row_id = resources.row_ids[row];
        if let Some(body) = bodies.remove(&row_id)
            && let Some(scope) = scopes.get(&row_id)
        {
            builder.add_rule_set(scope.clone(), body)?;
        }
    }
    Ok(LoadedRules {
        store: builder.finish()?,
        attr_rules,
    })
}

/// Fetches every characteristic table named by the attribute rules, in
/// registration order, keyed by rule name.
pub async fn load_characteristic_tables(
    fetcher: &dyn StoreFetcher,
    rules: &[UserAttributeRule],
) -> Result<BTreeMap<String, CharacteristicTable>, RowgateError> {
    let mut out = BTreeMap::new();
    for rule in rules {
        let data = fetcher.fetch_table(&TableQuery::all(&rule.table_id)).await?;
        out.insert(
            rule.name.clone(),
            CharacteristicTable::build(data, &rule.lookup_col_id),
        );
    }
    Ok(out)
}
