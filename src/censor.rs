use crate::cell::{CellValue, RowId};
use crate::eval::PermissionInfo;
use crate::lattice::{TableRead, Verdict};
use crate::table::TableData;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Document metadata tables subject to censoring.
pub const TABLES: &str = "_meta_Tables";
pub const TABLES_COLUMN: &str = "_meta_Tables_column";
pub const VIEWS: &str = "_meta_Views";
pub const VIEWS_SECTION: &str = "_meta_Views_section";
pub const VIEWS_SECTION_FIELD: &str = "_meta_Views_section_field";

pub const META_TABLE_IDS: [&str; 5] = [TABLES, TABLES_COLUMN, VIEWS, VIEWS_SECTION, VIEWS_SECTION_FIELD];

/// Universal column type used once a column's real type must be hidden.
const ANY_TYPE: &str = "Any";

fn text_of(table: &TableData, col: &str, row: usize) -> String {
    match table.cell(col, row) {
        Some(CellValue::Text(s)) => s.to_string(),
        _ => String::new(),
    }
}

fn ref_of(table: &TableData, col: &str, row: usize) -> RowId {
    match table.cell(col, row) {
        Some(CellValue::Reference(r)) => *r,
        Some(CellValue::Int(i)) => *i,
        _ => 0,
    }
}

fn set_cell(table: &mut TableData, col: &str, row: usize, value: CellValue) {
    if let Some(values) = table.columns.get_mut(col)
        && row < values.len()
    {
        values[row] = value;
    }
}

fn blank(table: &mut TableData, col: &str, row: usize) {
    set_cell(table, col, row, CellValue::Text("".into()));
}

fn zero_ref(table: &mut TableData, col: &str, row: usize) {
    set_cell(table, col, row, CellValue::Reference(0));
}

/// Rewrites the metadata tables so that names of and links to forbidden
/// objects disappear. Rows are overwritten, never deleted: the client keeps a
/// structurally intact schema with blanked identities. Applying this twice is
/// the same as applying it once, since censored rows no longer resolve to any
/// forbidden object.
pub fn censor_meta_tables(info: &PermissionInfo, meta: &mut BTreeMap<String, TableData>) {
    // Pass 1: read-only sweep to decide what is forbidden.
    let mut forbidden_table_rows: HashSet<RowId> = HashSet::new();
    let mut table_names: HashMap<RowId, String> = HashMap::new();
    if let Some(tables) = meta.get(TABLES) {
        for row in 0..tables.len() {
            let name = text_of(tables, "tableId", row);
            if name.is_empty() {
                continue;
            }
            let row_id = tables.row_ids[row];
            if info.table_access(&name).read == TableRead::Deny {
                forbidden_table_rows.insert(row_id);
            }
            table_names.insert(row_id, name);
        }
    }

    let mut censored_column_rows: HashSet<RowId> = HashSet::new();
    let mut columns_of_forbidden_tables: HashSet<RowId> = HashSet::new();
    if let Some(columns) = meta.get(TABLES_COLUMN) {
        for row in 0..columns.len() {
            let parent = ref_of(columns, "parentId", row);
            if parent == 0 {
                continue;
            }
            let row_id = columns.row_ids[row];
            if forbidden_table_rows.contains(&parent) {
                censored_column_rows.insert(row_id);
                columns_of_forbidden_tables.insert(row_id);
                continue;
            }
            let col_id = text_of(columns, "colId", row);
            if col_id.is_empty() {
                continue;
            }
            if let Some(table) = table_names.get(&parent)
                && info.column_access(table, &col_id).read() == Verdict::Deny
            {
                censored_column_rows.insert(row_id);
            }
        }
    }

    let mut censored_section_rows: HashSet<RowId> = HashSet::new();
    let mut censored_view_rows: HashSet<RowId> = HashSet::new();
    if let Some(sections) = meta.get(VIEWS_SECTION) {
        for row in 0..sections.len() {
            if forbidden_table_rows.contains(&ref_of(sections, "tableRef", row)) {
                censored_section_rows.insert(sections.row_ids[row]);
                let view = ref_of(sections, "parentId", row);
                if view != 0 {
                    censored_view_rows.insert(view);
                }
            }
        }
    }

    // Pass 2: overwrite.
    if let Some(tables) = meta.get_mut(TABLES) {
        for row in 0..tables.len() {
            if forbidden_table_rows.contains(&tables.row_ids[row]) {
                blank(tables, "tableId", row);
                zero_ref(tables, "primaryViewId", row);
            }
        }
    }

    if let Some(columns) = meta.get_mut(TABLES_COLUMN) {
        for row in 0..columns.len() {
            let row_id = columns.row_ids[row];
            if !censored_column_rows.contains(&row_id) {
                continue;
            }
            blank(columns, "label", row);
            blank(columns, "formula", row);
            blank(columns, "widgetOptions", row);
            set_cell(columns, "type", row, CellValue::text(ANY_TYPE));
            if columns_of_forbidden_tables.contains(&row_id) {
                zero_ref(columns, "parentId", row);
            }
        }
    }

    if let Some(sections) = meta.get_mut(VIEWS_SECTION) {
        for row in 0..sections.len() {
            if censored_section_rows.contains(&sections.row_ids[row]) {
                blank(sections, "title", row);
                zero_ref(sections, "tableRef", row);
            }
        }
    }

    if let Some(views) = meta.get_mut(VIEWS) {
        for row in 0..views.len() {
            if censored_view_rows.contains(&views.row_ids[row]) {
                blank(views, "name", row);
            }
        }
    }

    if let Some(fields) = meta.get_mut(VIEWS_SECTION_FIELD) {
        for row in 0..fields.len() {
            let section_censored =
                censored_section_rows.contains(&ref_of(fields, "parentId", row));
            let col_censored = censored_column_rows.contains(&ref_of(fields, "colRef", row));
            if !section_censored && !col_censored {
                continue;
            }
            blank(fields, "filter", row);
            if col_censored {
                zero_ref(fields, "colRef", row);
            }
        }
    }
}
