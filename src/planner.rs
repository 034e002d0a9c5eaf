use crate::action::DocAction;
use crate::cell::{CellValue, RowId};
use crate::error::RowgateError;
use crate::eval::PermissionInfo;
use crate::lattice::{TableRead, Verdict};
use crate::snapshot::SnapshotStep;
use crate::table::TableData;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Rewrites one outgoing mutation for a recipient with restricted visibility.
///
/// Returns zero or more derived mutations, in delivery order: synthetic adds
/// for rows the mutation made visible, then the (possibly thinned) original,
/// then synthetic removes for rows it hid. `NeedReload` propagates when the
/// recipient's schema view can no longer be patched.
pub(crate) fn prune_outgoing_action(
    info: &PermissionInfo,
    action: &DocAction,
    step: Option<&SnapshotStep>,
) -> Result<Vec<DocAction>, RowgateError> {
    let table_id = action.table_id();
    let access = info.table_access(table_id);
    match access.read {
        TableRead::Deny => Ok(Vec::new()),
        TableRead::Allow => Ok(vec![action.clone()]),
        TableRead::MixedColumns | TableRead::Mixed if action.is_schema_shaped() => {
            prune_schema_action(info, action)
        }
        TableRead::MixedColumns => Ok(prune_columns(info, action.clone()).into_iter().collect()),
        TableRead::Mixed => prune_row_mixed(info, action, step),
    }
}

/// Schema changes cannot be partially delivered. A change to a column the
/// recipient cannot see at all is silently dropped; anything else forces the
/// recipient to resync.
fn prune_schema_action(
    info: &PermissionInfo,
    action: &DocAction,
) -> Result<Vec<DocAction>, RowgateError> {
    if let Some(col) = action.touched_col()
        && info.column_access(action.table_id(), col).read() == Verdict::Deny
    {
        return Ok(Vec::new());
    }
    Err(RowgateError::NeedReload)
}

fn forbidden_in(info: &PermissionInfo, table_id: &str, image: &TableData, row_id: RowId) -> bool {
    match image.record(row_id) {
        Some(rec) => info.row_forbidden(table_id, &rec),
        // A row absent from this side of the snapshot does not exist for
        // anyone, so it is not visible either.
        None => true,
    }
}

fn prune_row_mixed(
    info: &PermissionInfo,
    action: &DocAction,
    step: Option<&SnapshotStep>,
) -> Result<Vec<DocAction>, RowgateError> {
    let Some(step) = step else {
        return Err(RowgateError::NoActiveBroadcast);
    };
    let table_id = action.table_id();

    let mut keep: SmallVec<[RowId; 8]> = SmallVec::new();
    let mut additions: SmallVec<[RowId; 8]> = SmallVec::new();
    let mut removals: SmallVec<[RowId; 8]> = SmallVec::new();
    for row_id in action.row_ids() {
        let hidden_before = forbidden_in(info, table_id, &step.before, row_id);
        let hidden_after = forbidden_in(info, table_id, &step.after, row_id);
        if action.is_update_shaped() {
            match (hidden_before, hidden_after) {
                (true, true) => {}
                (false, false) => keep.push(row_id),
                // Newly visible: deliver the full row instead of a patch.
                (true, false) => additions.push(row_id),
                // Newly hidden: the recipient must forget the row.
                (false, true) => removals.push(row_id),
            }
        } else if action.is_add_shaped() {
            if !hidden_after {
                keep.push(row_id);
            }
        } else if !hidden_before {
            keep.push(row_id);
        }
    }

    let mut derived: Vec<DocAction> = Vec::new();
    if !additions.is_empty() {
        derived.push(bulk_add_from_image(&step.after, table_id, &additions));
    }
    if let Some(thinned) = retain_rows(action, &keep) {
        derived.push(thinned);
    }
    if !removals.is_empty() {
        derived.push(DocAction::BulkRemoveRecord {
            table_id: table_id.to_string(),
            row_ids: removals.to_vec(),
        });
    }

    let mut out = Vec::with_capacity(derived.len());
    for action in derived {
        if let Some(action) = prune_columns(info, action)
            && let Some(action) = censor_cells(info, action, &step.after)
        {
            out.push(action);
        }
    }
    Ok(out)
}

/// Synthetic bulk-add carrying the full post-state of the given rows.
fn bulk_add_from_image(image: &TableData, table_id: &str, row_ids: &[RowId]) -> DocAction {
    let mut columns: BTreeMap<String, Vec<CellValue>> = BTreeMap::new();
    for (col, values) in &image.columns {
        let mut out = Vec::with_capacity(row_ids.len());
        for row_id in row_ids {
            let value = image
                .row_index(*row_id)
                .and_then(|row| values.get(row))
                .cloned()
                .unwrap_or(CellValue::Null);
            out.push(value);
        }
        columns.insert(col.clone(), out);
    }
    DocAction::BulkAddRecord {
        table_id: table_id.to_string(),
        row_ids: row_ids.to_vec(),
        columns,
    }
}

/// Thins a record-shaped action down to the given rows. Returns `None` when
/// nothing is left.
fn retain_rows(action: &DocAction, keep: &[RowId]) -> Option<DocAction> {
    let keeps = |row_id: &RowId| keep.contains(row_id);
    match action {
        DocAction::AddRecord { row_id, .. }
        | DocAction::UpdateRecord { row_id, .. }
        | DocAction::RemoveRecord { row_id, .. } => keeps(row_id).then(|| action.clone()),
        DocAction::BulkRemoveRecord { table_id, row_ids } => {
            let kept: Vec<RowId> = row_ids.iter().copied().filter(|id| keeps(id)).collect();
            (!kept.is_empty()).then(|| DocAction::BulkRemoveRecord {
                table_id: table_id.clone(),
                row_ids: kept,
            })
        }
        DocAction::BulkAddRecord { .. }
        | DocAction::BulkUpdateRecord { .. }
        | DocAction::ReplaceTableData { .. } => thin_bulk(action, keep),
        _ => Some(action.clone()),
    }
}

fn thin_bulk(action: &DocAction, keep: &[RowId]) -> Option<DocAction> {
    let (table_id, row_ids, columns) = match action {
        DocAction::BulkAddRecord {
            table_id,
            row_ids,
            columns,
        }
        | DocAction::BulkUpdateRecord {
            table_id,
            row_ids,
            columns,
        }
        | DocAction::ReplaceTableData {
            table_id,
            row_ids,
            columns,
        } => (table_id, row_ids, columns),
        _ => return Some(action.clone()),
    };
    let kept_idx: Vec<usize> = row_ids
        .iter()
        .enumerate()
        .filter(|(_, id)| keep.contains(*id))
        .map(|(i, _)| i)
        .collect();
    if kept_idx.is_empty() {
        return None;
    }
    let new_rows: Vec<RowId> = kept_idx.iter().map(|&i| row_ids[i]).collect();
    let new_columns: BTreeMap<String, Vec<CellValue>> = columns
        .iter()
        .map(|(col, values)| {
            let vals = kept_idx
                .iter()
                .map(|&i| values.get(i).cloned().unwrap_or(CellValue::Null))
                .collect();
            (col.clone(), vals)
        })
        .collect();
    Some(match action {
        DocAction::BulkAddRecord { .. } => DocAction::BulkAddRecord {
            table_id: table_id.clone(),
            row_ids: new_rows,
            columns: new_columns,
        },
        DocAction::BulkUpdateRecord { .. } => DocAction::BulkUpdateRecord {
            table_id: table_id.clone(),
            row_ids: new_rows,
            columns: new_columns,
        },
        _ => DocAction::ReplaceTableData {
            table_id: table_id.clone(),
            row_ids: new_rows,
            columns: new_columns,
        },
    })
}

/// Drops columns whose column-level read is deny. An action left with no
/// columns at all is dropped entirely.
pub(crate) fn prune_columns(info: &PermissionInfo, action: DocAction) -> Option<DocAction> {
    let table_id = action.table_id().to_string();
    let readable = |col: &str| info.column_access(&table_id, col).read() != Verdict::Deny;
    match action {
        DocAction::AddRecord {
            table_id,
            row_id,
            mut values,
        } => {
            values.retain(|col, _| readable(col));
            (!values.is_empty()).then_some(DocAction::AddRecord {
                table_id,
                row_id,
                values,
            })
        }
        DocAction::UpdateRecord {
            table_id,
            row_id,
            mut values,
        } => {
            values.retain(|col, _| readable(col));
            (!values.is_empty()).then_some(DocAction::UpdateRecord {
                table_id,
                row_id,
                values,
            })
        }
        DocAction::BulkAddRecord {
            table_id,
            row_ids,
            mut columns,
        } => {
            columns.retain(|col, _| readable(col));
            (!columns.is_empty()).then_some(DocAction::BulkAddRecord {
                table_id,
                row_ids,
                columns,
            })
        }
        DocAction::BulkUpdateRecord {
            table_id,
            row_ids,
            mut columns,
        } => {
            columns.retain(|col, _| readable(col));
            (!columns.is_empty()).then_some(DocAction::BulkUpdateRecord {
                table_id,
                row_ids,
                columns,
            })
        }
        DocAction::ReplaceTableData {
            table_id,
            row_ids,
            mut columns,
        } => {
            columns.retain(|col, _| readable(col));
            (!columns.is_empty()).then_some(DocAction::ReplaceTableData {
                table_id,
                row_ids,
                columns,
            })
        }
        other => Some(other),
    }
}

/// Re-evaluates every remaining row with its post-state bound as the record:
/// unreadable rows are dropped, and cells in columns that are not cleanly
/// readable for that row are replaced with the censor sentinel.
fn censor_cells(
    info: &PermissionInfo,
    action: DocAction,
    after: &TableData,
) -> Option<DocAction> {
    let table_id = action.table_id().to_string();
    match action {
        DocAction::AddRecord {
            table_id: t,
            row_id,
            mut values,
        } => {
            let Some(rec) = after.record(row_id) else {
                return None;
            };
            if info.row_forbidden(&table_id, &rec) {
                return None;
            }
            for (col, value) in values.iter_mut() {
                if info.column_access_with(&table_id, col, &rec).read() != Verdict::Allow {
                    *value = CellValue::Censored;
                }
            }
            Some(DocAction::AddRecord {
                table_id: t,
                row_id,
                values,
            })
        }
        DocAction::UpdateRecord {
            table_id: t,
            row_id,
            mut values,
        } => {
            let Some(rec) = after.record(row_id) else {
                return None;
            };
            if info.row_forbidden(&table_id, &rec) {
                return None;
            }
            for (col, value) in values.iter_mut() {
                if info.column_access_with(&table_id, col, &rec).read() != Verdict::Allow {
                    *value = CellValue::Censored;
                }
            }
            Some(DocAction::UpdateRecord {
                table_id: t,
                row_id,
                values,
            })
        }
        DocAction::BulkAddRecord { .. }
        | DocAction::BulkUpdateRecord { .. }
        | DocAction::ReplaceTableData { .. } => censor_bulk(info, action, after),
        other => Some(other),
    }
}

fn censor_bulk(info: &PermissionInfo, action: DocAction, after: &TableData) -> Option<DocAction> {
    let (table_id, row_ids, columns) = match &action {
        DocAction::BulkAddRecord {
            table_id,
            row_ids,
            columns,
        }
        | DocAction::BulkUpdateRecord {
            table_id,
            row_ids,
            columns,
        }
        | DocAction::ReplaceTableData {
            table_id,
            row_ids,
            columns,
        } => (table_id.clone(), row_ids.clone(), columns.clone()),
        _ => return Some(action),
    };

    let mut kept: Vec<RowId> = Vec::with_capacity(row_ids.len());
    let mut censored: Vec<(usize, String)> = Vec::new();
    for (i, row_id) in row_ids.iter().enumerate() {
        let Some(rec) = after.record(*row_id) else {
            continue;
        };
        if info.row_forbidden(&table_id, &rec) {
            continue;
        }
        kept.push(*row_id);
        for col in columns.keys() {
            if info.column_access_with(&table_id, col, &rec).read() != Verdict::Allow {
                censored.push((i, col.clone()));
            }
        }
    }
    if kept.is_empty() {
        return None;
    }

    let mut columns = columns;
    for (i, col) in censored {
        if let Some(values) = columns.get_mut(&col)
            && let Some(value) = values.get_mut(i)
        {
            *value = CellValue::Censored;
        }
    }
    let thinned = match &action {
        DocAction::BulkAddRecord { .. } => DocAction::BulkAddRecord {
            table_id,
            row_ids,
            columns,
        },
        DocAction::BulkUpdateRecord { .. } => DocAction::BulkUpdateRecord {
            table_id,
            row_ids,
            columns,
        },
        _ => DocAction::ReplaceTableData {
            table_id,
            row_ids,
            columns,
        },
    };
    retain_rows(&thinned, &kept)
}

/// In-place row and column filtering of a fetched table.
pub(crate) fn filter_table_data(info: &PermissionInfo, data: &mut TableData) {
    let table_id = data.table_id.clone();

    let denied: Vec<String> = data
        .columns
        .keys()
        .filter(|col| info.column_access(&table_id, col).read() == Verdict::Deny)
        .cloned()
        .collect();
    for col in denied {
        data.columns.remove(&col);
    }

    let mut kept_rows: Vec<usize> = Vec::with_capacity(data.len());
    let mut censored: Vec<(usize, String)> = Vec::new();
    for row in 0..data.len() {
        let rec = data.record_at(row);
        if info.row_forbidden(&table_id, &rec) {
            continue;
        }
        kept_rows.push(row);
        for col in data.columns.keys() {
            if info.column_access_with(&table_id, col, &rec).read() != Verdict::Allow {
                censored.push((row, col.clone()));
            }
        }
    }

    for (row, col) in censored {
        if let Some(values) = data.columns.get_mut(&col)
            && let Some(value) = values.get_mut(row)
        {
            *value = CellValue::Censored;
        }
    }
    if kept_rows.len() != data.len() {
        let new_ids: Vec<RowId> = kept_rows.iter().map(|&row| data.row_ids[row]).collect();
        data.row_ids = new_ids;
        for values in data.columns.values_mut() {
            let new_values: Vec<CellValue> = kept_rows
                .iter()
                .map(|&row| values.get(row).cloned().unwrap_or(CellValue::Null))
                .collect();
            *values = new_values;
        }
    }
}
