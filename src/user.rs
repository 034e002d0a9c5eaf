use crate::cell::CellValue;
use crate::session::{Role, Session};
use crate::table::{RecordView, TableData};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Fields every user record carries. Attribute rules may not shadow these.
pub const BUILTIN_USER_KEYS: [&str; 4] = ["Access", "UserID", "Email", "Name"];

/// Declares an extra binding on the user record: resolve `char_id` against the
/// user, normalize it, and look the result up in `table_id` via
/// `lookup_col_id`. The matching row becomes visible to rules as `name`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserAttributeRule {
    pub name: String,
    #[serde(rename = "tableId")]
    pub table_id: String,
    #[serde(rename = "lookupColId")]
    pub lookup_col_id: String,
    #[serde(rename = "charId")]
    pub char_id: String,
}

/// Key used for characteristic-table lookups: the lowercased JSON image of
/// the value. Record-typed values collapse to their `id` field first (see
/// `UserInfo::resolve_path`). Kept public so the exact normalization stays
/// observable.
pub fn normalized_lookup_key(value: &CellValue) -> String {
    value.to_json().to_string().to_lowercase()
}

/// A source table loaded wholesale, with an index from normalized lookup key
/// to row. When several rows share a key, the first one wins.
#[derive(Debug, Clone)]
pub struct CharacteristicTable {
    data: Arc<TableData>,
    index: HashMap<String, usize>,
}

impl CharacteristicTable {
    pub fn build(data: TableData, lookup_col: &str) -> Self {
        let mut index = HashMap::with_capacity(data.len());
        if let Some(values) = data.columns.get(lookup_col) {
            for (row, value) in values.iter().enumerate() {
                index.entry(normalized_lookup_key(value)).or_insert(row);
            }
        }
        Self {
            data: Arc::new(data),
            index,
        }
    }

    /// The matching row, or the empty record view when the key is absent.
    pub fn lookup(&self, key: &str) -> AttrRecord {
        AttrRecord {
            data: Arc::clone(&self.data),
            row: self.index.get(key).copied(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An attribute binding on a user record: one row of a characteristic table,
/// or the empty record when the lookup found nothing.
#[derive(Debug, Clone)]
pub struct AttrRecord {
    data: Arc<TableData>,
    row: Option<usize>,
}

impl AttrRecord {
    pub fn view(&self) -> RecordView<'_> {
        match self.row {
            Some(row) => self.data.record_at(row),
            None => self.data.empty_record(),
        }
    }

    pub fn is_empty_record(&self) -> bool {
        self.row.is_none()
    }
}

/// The user record rules evaluate against: built-in session fields plus any
/// bindings contributed by attribute rules.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub access: Role,
    pub user_id: Option<i64>,
    pub email: Option<String>,
    pub name: Option<String>,
    attrs: BTreeMap<String, AttrRecord>,
}

impl UserInfo {
    pub fn from_session(session: &Session) -> Self {
        Self {
            access: session.role,
            user_id: session.user.as_ref().map(|u| u.id),
            email: session.user.as_ref().map(|u| u.email.clone()),
            name: session.user.as_ref().map(|u| u.name.clone()),
            attrs: BTreeMap::new(),
        }
    }

    pub fn builtin_field(&self, key: &str) -> Option<CellValue> {
        match key {
            "Access" => Some(CellValue::text(self.access.as_str())),
            "UserID" => Some(self.user_id.map_or(CellValue::Null, CellValue::Int)),
            "Email" => Some(
                self.email
                    .as_deref()
                    .map_or(CellValue::Null, CellValue::text),
            ),
            "Name" => Some(
                self.name
                    .as_deref()
                    .map_or(CellValue::Null, CellValue::text),
            ),
            _ => None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&AttrRecord> {
        self.attrs.get(name)
    }

    pub(crate) fn bind_attr(&mut self, name: &str, rec: AttrRecord) {
        self.attrs.insert(name.to_string(), rec);
    }

    /// Resolves a dotted lookup path (`Email`, `office.city`) against this
    /// record. A path ending on an attribute record collapses to that row's
    /// id, so record-valued keys normalize by identity.
    pub fn resolve_path(&self, path: &str) -> CellValue {
        let mut segments = path.split('.');
        let Some(first) = segments.next() else {
            return CellValue::Null;
        };
        if let Some(value) = self.builtin_field(first) {
            return if segments.next().is_none() {
                value
            } else {
                CellValue::Null
            };
        }
        let Some(attr) = self.attrs.get(first) else {
            return CellValue::Null;
        };
        let Some(col) = segments.next() else {
            return CellValue::Reference(attr.view().row_id().unwrap_or(0));
        };
        if segments.next().is_some() {
            // Paths deeper than attribute.column have no table context here.
            return CellValue::Null;
        }
        attr.view().get(col)
    }
}

/// Binds every attribute rule, in registration order, against an
/// already-partially-enriched user: later rules may observe earlier bindings.
pub fn enrich_user(
    user: &mut UserInfo,
    rules: &[UserAttributeRule],
    tables: &BTreeMap<String, CharacteristicTable>,
) {
    for rule in rules {
        let Some(table) = tables.get(&rule.name) else {
            continue;
        };
        let key = normalized_lookup_key(&user.resolve_path(&rule.char_id));
        user.bind_attr(&rule.name, table.lookup(&key));
    }
}
