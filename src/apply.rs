use crate::action::DocAction;
use crate::cell::CellValue;
use crate::table::TableData;
use std::collections::BTreeMap;

/// Applies one action to an in-memory working set of tables.
///
/// Used when reconstructing row snapshots: the working set starts from a
/// filtered fetch, is rolled back through the undo log, then replayed through
/// the forward log. The logs come from the server and are internally
/// consistent, so application is tolerant: a mutation against a missing table
/// or row is a no-op rather than an error.
pub fn apply_action(tables: &mut BTreeMap<String, TableData>, action: &DocAction) {
    match action {
        DocAction::AddRecord {
            table_id,
            row_id,
            values,
        } => {
            let table = table_entry(tables, table_id);
            add_row(table, *row_id, values);
        }
        DocAction::BulkAddRecord {
            table_id,
            row_ids,
            columns,
        } => {
            let table = table_entry(tables, table_id);
            for (i, row_id) in row_ids.iter().enumerate() {
                let values: BTreeMap<String, CellValue> = columns
                    .iter()
                    .filter_map(|(col, vals)| vals.get(i).map(|v| (col.clone(), v.clone())))
                    .collect();
                add_row(table, *row_id, &values);
            }
        }
        DocAction::ReplaceTableData {
            table_id,
            row_ids,
            columns,
        } => {
            let table = table_entry(tables, table_id);
            table.row_ids.clear();
            for values in table.columns.values_mut() {
                values.clear();
            }
            for (i, row_id) in row_ids.iter().enumerate() {
                let values: BTreeMap<String, CellValue> = columns
                    .iter()
                    .filter_map(|(col, vals)| vals.get(i).map(|v| (col.clone(), v.clone())))
                    .collect();
                add_row(table, *row_id, &values);
            }
        }
        DocAction::UpdateRecord {
            table_id,
            row_id,
            values,
        } => {
            let table = table_entry(tables, table_id);
            update_row(table, *row_id, values);
        }
        DocAction::BulkUpdateRecord {
            table_id,
            row_ids,
            columns,
        } => {
            let table = table_entry(tables, table_id);
            for (i, row_id) in row_ids.iter().enumerate() {
                let values: BTreeMap<String, CellValue> = columns
                    .iter()
                    .filter_map(|(col, vals)| vals.get(i).map(|v| (col.clone(), v.clone())))
                    .collect();
                update_row(table, *row_id, &values);
            }
        }
        DocAction::RemoveRecord { table_id, row_id } => {
            let table = table_entry(tables, table_id);
            remove_row(table, *row_id);
        }
        DocAction::BulkRemoveRecord { table_id, row_ids } => {
            let table = table_entry(tables, table_id);
            for row_id in row_ids {
                remove_row(table, *row_id);
            }
        }
        DocAction::AddTable { table_id, columns } => {
            let mut data = TableData::new(table_id);
            for col in columns {
                data.columns.insert(col.col_id.clone(), Vec::new());
            }
            tables.insert(table_id.clone(), data);
        }
        DocAction::RemoveTable { table_id } => {
            tables.remove(table_id);
        }
        DocAction::RenameTable {
            old_table_id,
            new_table_id,
        } => {
            if let Some(mut data) = tables.remove(old_table_id) {
                data.table_id = new_table_id.clone();
                tables.insert(new_table_id.clone(), data);
            }
        }
        DocAction::AddColumn {
            table_id, col_id, ..
        } => {
            let table = table_entry(tables, table_id);
            let filler = vec![CellValue::Null; table.row_ids.len()];
            table.columns.entry(col_id.clone()).or_insert(filler);
        }
        DocAction::RemoveColumn { table_id, col_id } => {
            let table = table_entry(tables, table_id);
            table.columns.remove(col_id);
        }
        DocAction::RenameColumn {
            table_id,
            old_col_id,
            new_col_id,
        } => {
            let table = table_entry(tables, table_id);
            if let Some(values) = table.columns.remove(old_col_id) {
                table.columns.insert(new_col_id.clone(), values);
            }
        }
        // Column metadata changes do not touch stored cells.
        DocAction::ModifyColumn { .. } => {}
    }
}

pub fn apply_actions(tables: &mut BTreeMap<String, TableData>, actions: &[DocAction]) {
    for action in actions {
        apply_action(tables, action);
    }
}

fn table_entry<'a>(
    tables: &'a mut BTreeMap<String, TableData>,
    table_id: &str,
) -> &'a mut TableData {
    tables
        .entry(table_id.to_string())
        .or_insert_with(|| TableData::new(table_id))
}

fn add_row(table: &mut TableData, row_id: i64, values: &BTreeMap<String, CellValue>) {
    if table.row_index(row_id).is_some() {
        update_row(table, row_id, values);
        return;
    }
    table.row_ids.push(row_id);
    let len = table.row_ids.len();
    for (col, vals) in table.columns.iter_mut() {
        vals.resize(len - 1, CellValue::Null);
        vals.push(values.get(col).cloned().unwrap_or(CellValue::Null));
    }
    for (col, value) in values {
        if !table.columns.contains_key(col) {
            let mut vals = vec![CellValue::Null; len - 1];
            vals.push(value.clone());
            table.columns.insert(col.clone(), vals);
        }
    }
}

fn update_row(table: &mut TableData, row_id: i64, values: &BTreeMap<String, CellValue>) {
    let Some(row) = table.row_index(row_id) else {
        return;
    };
    let len = table.row_ids.len();
    for (col, value) in values {
        let vals = table
            .columns
            .entry(col.clone())
            .or_insert_with(|| vec![CellValue::Null; len]);
        vals.resize(len, CellValue::Null);
        vals[row] = value.clone();
    }
}

fn remove_row(table: &mut TableData, row_id: i64) {
    let Some(row) = table.row_index(row_id) else {
        return;
    };
    table.row_ids.remove(row);
    for vals in table.columns.values_mut() {
        if row < vals.len() {
            vals.remove(row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_action, apply_actions};
    use crate::action::DocAction;
    use crate::cell::CellValue;
    use crate::table::TableData;
    use std::collections::BTreeMap;

    fn seed() -> BTreeMap<String, TableData> {
        let mut t = TableData::new("T");
        t.row_ids = vec![1, 2];
        t.columns.insert(
            "owner".into(),
            vec![CellValue::text("alice"), CellValue::text("bob")],
        );
        BTreeMap::from([("T".to_string(), t)])
    }

    #[test]
    fn update_then_remove_round_trips() {
        let mut tables = seed();
        apply_actions(
            &mut tables,
            &[
                DocAction::UpdateRecord {
                    table_id: "T".into(),
                    row_id: 2,
                    values: BTreeMap::from([("owner".into(), CellValue::text("carol"))]),
                },
                DocAction::RemoveRecord {
                    table_id: "T".into(),
                    row_id: 1,
                },
            ],
        );
        let t = &tables["T"];
        assert_eq!(t.row_ids, vec![2]);
        assert_eq!(t.cell("owner", 0), Some(&CellValue::text("carol")));
    }

    #[test]
    fn add_record_backfills_new_columns() {
        let mut tables = seed();
        apply_action(
            &mut tables,
            &DocAction::AddRecord {
                table_id: "T".into(),
                row_id: 3,
                values: BTreeMap::from([("stage".into(), CellValue::Int(1))]),
            },
        );
        let t = &tables["T"];
        assert_eq!(t.row_ids, vec![1, 2, 3]);
        assert_eq!(t.cell("stage", 0), Some(&CellValue::Null));
        assert_eq!(t.cell("stage", 2), Some(&CellValue::Int(1)));
        assert_eq!(t.cell("owner", 2), Some(&CellValue::Null));
    }

    #[test]
    fn rename_table_moves_working_set_entry() {
        let mut tables = seed();
        apply_action(
            &mut tables,
            &DocAction::RenameTable {
                old_table_id: "T".into(),
                new_table_id: "Leads".into(),
            },
        );
        assert!(!tables.contains_key("T"));
        assert_eq!(tables["Leads"].table_id, "Leads");
    }

    #[test]
    fn mutations_against_missing_rows_are_no_ops() {
        let mut tables = seed();
        apply_action(
            &mut tables,
            &DocAction::RemoveRecord {
                table_id: "T".into(),
                row_id: 99,
            },
        );
        assert_eq!(tables["T"].row_ids, vec![1, 2]);
    }
}
