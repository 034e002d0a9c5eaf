use crate::cell::{CellValue, RowId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Tables reserved for document metadata (schema, views, access rules) carry
/// this prefix. Record mutations against them are gated more strictly than
/// user tables.
pub const META_PREFIX: &str = "_meta_";

pub fn is_reserved_table(table_id: &str) -> bool {
    table_id.starts_with(META_PREFIX)
}

/// Values for a single row, keyed by column.
pub type RowValues = BTreeMap<String, CellValue>;
/// Values for several rows, keyed by column, parallel to a row-id list.
pub type BulkValues = BTreeMap<String, Vec<CellValue>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub col_id: String,
    pub col_type: String,
}

/// A single mutation of one table, as recorded in the document's action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocAction {
    AddRecord {
        table_id: String,
        row_id: RowId,
        values: RowValues,
    },
    BulkAddRecord {
        table_id: String,
        row_ids: Vec<RowId>,
        columns: BulkValues,
    },
    UpdateRecord {
        table_id: String,
        row_id: RowId,
        values: RowValues,
    },
    BulkUpdateRecord {
        table_id: String,
        row_ids: Vec<RowId>,
        columns: BulkValues,
    },
    RemoveRecord {
        table_id: String,
        row_id: RowId,
    },
    BulkRemoveRecord {
        table_id: String,
        row_ids: Vec<RowId>,
    },
    ReplaceTableData {
        table_id: String,
        row_ids: Vec<RowId>,
        columns: BulkValues,
    },
    AddTable {
        table_id: String,
        columns: Vec<ColumnDef>,
    },
    RemoveTable {
        table_id: String,
    },
    RenameTable {
        old_table_id: String,
        new_table_id: String,
    },
    AddColumn {
        table_id: String,
        col_id: String,
        info: RowValues,
    },
    RemoveColumn {
        table_id: String,
        col_id: String,
    },
    RenameColumn {
        table_id: String,
        old_col_id: String,
        new_col_id: String,
    },
    ModifyColumn {
        table_id: String,
        col_id: String,
        info: RowValues,
    },
}

impl DocAction {
    /// Table this action targets. For renames, the name the action addresses
    /// (the old one).
    pub fn table_id(&self) -> &str {
        match self {
            DocAction::AddRecord { table_id, .. }
            | DocAction::BulkAddRecord { table_id, .. }
            | DocAction::UpdateRecord { table_id, .. }
            | DocAction::BulkUpdateRecord { table_id, .. }
            | DocAction::RemoveRecord { table_id, .. }
            | DocAction::BulkRemoveRecord { table_id, .. }
            | DocAction::ReplaceTableData { table_id, .. }
            | DocAction::AddTable { table_id, .. }
            | DocAction::RemoveTable { table_id }
            | DocAction::AddColumn { table_id, .. }
            | DocAction::RemoveColumn { table_id, .. }
            | DocAction::RenameColumn { table_id, .. }
            | DocAction::ModifyColumn { table_id, .. } => table_id,
            DocAction::RenameTable { old_table_id, .. } => old_table_id,
        }
    }

    /// Table id under which the target lives after this action applies.
    pub fn resulting_table_id(&self) -> &str {
        match self {
            DocAction::RenameTable { new_table_id, .. } => new_table_id,
            other => other.table_id(),
        }
    }

    pub fn is_schema_shaped(&self) -> bool {
        matches!(
            self,
            DocAction::AddTable { .. }
                | DocAction::RemoveTable { .. }
                | DocAction::RenameTable { .. }
                | DocAction::AddColumn { .. }
                | DocAction::RemoveColumn { .. }
                | DocAction::RenameColumn { .. }
                | DocAction::ModifyColumn { .. }
        )
    }

    pub fn is_record_shaped(&self) -> bool {
        !self.is_schema_shaped()
    }

    pub fn is_update_shaped(&self) -> bool {
        matches!(
            self,
            DocAction::UpdateRecord { .. } | DocAction::BulkUpdateRecord { .. }
        )
    }

    pub fn is_add_shaped(&self) -> bool {
        matches!(
            self,
            DocAction::AddRecord { .. }
                | DocAction::BulkAddRecord { .. }
                | DocAction::ReplaceTableData { .. }
        )
    }

    pub fn is_remove_shaped(&self) -> bool {
        matches!(
            self,
            DocAction::RemoveRecord { .. } | DocAction::BulkRemoveRecord { .. }
        )
    }

    /// Rows referenced by a record-shaped action; empty for schema actions.
    pub fn row_ids(&self) -> SmallVec<[RowId; 8]> {
        match self {
            DocAction::AddRecord { row_id, .. }
            | DocAction::UpdateRecord { row_id, .. }
            | DocAction::RemoveRecord { row_id, .. } => SmallVec::from_slice(&[*row_id]),
            DocAction::BulkAddRecord { row_ids, .. }
            | DocAction::BulkUpdateRecord { row_ids, .. }
            | DocAction::BulkRemoveRecord { row_ids, .. }
            | DocAction::ReplaceTableData { row_ids, .. } => SmallVec::from_slice(row_ids),
            _ => SmallVec::new(),
        }
    }

    /// Column a schema-shaped action touches, if any. For renames, the column
    /// the recipient currently knows (the old one).
    pub fn touched_col(&self) -> Option<&str> {
        match self {
            DocAction::AddColumn { col_id, .. }
            | DocAction::RemoveColumn { col_id, .. }
            | DocAction::ModifyColumn { col_id, .. } => Some(col_id),
            DocAction::RenameColumn { old_col_id, .. } => Some(old_col_id),
            _ => None,
        }
    }

    /// Columns carried by a record-shaped action, if it carries any.
    pub fn carried_cols(&self) -> Option<Vec<&str>> {
        match self {
            DocAction::AddRecord { values, .. } | DocAction::UpdateRecord { values, .. } => {
                Some(values.keys().map(String::as_str).collect())
            }
            DocAction::BulkAddRecord { columns, .. }
            | DocAction::BulkUpdateRecord { columns, .. }
            | DocAction::ReplaceTableData { columns, .. } => {
                Some(columns.keys().map(String::as_str).collect())
            }
            _ => None,
        }
    }
}

/// An action as submitted by a client. Doc mutations are wrapped; the rest of
/// the surface is service operations with their own gating classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UserAction {
    Doc(DocAction),
    ApplyUndoActions(Vec<UserAction>),
    ApplyDocActions(Vec<UserAction>),
    Calculate,
    UpdateCurrentTime,
    SetDisplayFormula {
        table_id: String,
        field_ref: RowId,
        col_ref: RowId,
        formula: String,
    },
    InitNewDoc,
    EvalCode {
        code: String,
    },
    /// Wire action this engine does not model. Always denied.
    Raw {
        name: String,
    },
}

/// Outgoing envelope around one applied bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionGroup {
    pub action_num: u64,
    pub actions: Vec<DocAction>,
    pub desc: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{DocAction, is_reserved_table};
    use crate::cell::CellValue;
    use std::collections::BTreeMap;

    #[test]
    fn reserved_prefix_is_recognized() {
        assert!(is_reserved_table("_meta_Tables"));
        assert!(!is_reserved_table("Tables"));
        assert!(!is_reserved_table("meta_Tables"));
    }

    #[test]
    fn shapes_and_rows() {
        let update = DocAction::UpdateRecord {
            table_id: "T".into(),
            row_id: 4,
            values: BTreeMap::from([("x".into(), CellValue::Int(1))]),
        };
        assert!(update.is_record_shaped());
        assert!(update.is_update_shaped());
        assert_eq!(update.row_ids().as_slice(), &[4]);
        assert_eq!(update.carried_cols(), Some(vec!["x"]));

        let rename = DocAction::RenameTable {
            old_table_id: "Old".into(),
            new_table_id: "New".into(),
        };
        assert!(rename.is_schema_shaped());
        assert_eq!(rename.table_id(), "Old");
        assert_eq!(rename.resulting_table_id(), "New");
        assert!(rename.row_ids().is_empty());
    }

    #[test]
    fn touched_col_uses_old_name_for_renames() {
        let rename = DocAction::RenameColumn {
            table_id: "T".into(),
            old_col_id: "a".into(),
            new_col_id: "b".into(),
        };
        assert_eq!(rename.touched_col(), Some("a"));
    }
}
