use crate::cell::{CellValue, RowId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column-major image of a table: `row_ids` gives row identity, and every
/// column holds one value per row, in the same order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub table_id: String,
    pub row_ids: Vec<RowId>,
    pub columns: BTreeMap<String, Vec<CellValue>>,
}

impl TableData {
    pub fn new(table_id: &str) -> Self {
        Self {
            table_id: table_id.to_string(),
            row_ids: Vec::new(),
            columns: BTreeMap::new(),
        }
    }

    pub fn with_columns(table_id: &str, cols: &[&str]) -> Self {
        let mut data = Self::new(table_id);
        for col in cols {
            data.columns.insert((*col).to_string(), Vec::new());
        }
        data
    }

    pub fn len(&self) -> usize {
        self.row_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    pub fn row_index(&self, row_id: RowId) -> Option<usize> {
        self.row_ids.iter().position(|id| *id == row_id)
    }

    pub fn cell(&self, col: &str, row: usize) -> Option<&CellValue> {
        self.columns.get(col).and_then(|values| values.get(row))
    }

    /// First row whose `col` equals `value`.
    pub fn find_row(&self, col: &str, value: &CellValue) -> Option<RowId> {
        let values = self.columns.get(col)?;
        values
            .iter()
            .position(|v| v == value)
            .map(|idx| self.row_ids[idx])
    }

    pub fn record(&self, row_id: RowId) -> Option<RecordView<'_>> {
        self.row_index(row_id).map(|row| RecordView {
            data: self,
            row: Some(row),
        })
    }

    pub fn record_at(&self, row: usize) -> RecordView<'_> {
        RecordView {
            data: self,
            row: Some(row),
        }
    }

    /// A record where every column reads as null. Serializes to `{}`.
    pub fn empty_record(&self) -> RecordView<'_> {
        RecordView {
            data: self,
            row: None,
        }
    }

    pub fn records(&self) -> impl Iterator<Item = RecordView<'_>> {
        (0..self.row_ids.len()).map(|row| RecordView {
            data: self,
            row: Some(row),
        })
    }
}

/// Cheap projection of one row (or of no row at all, for the empty record).
/// The pseudo-column `id` yields the row id; absent columns yield null.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    data: &'a TableData,
    row: Option<usize>,
}

impl<'a> RecordView<'a> {
    pub fn table_id(&self) -> &str {
        &self.data.table_id
    }

    pub fn row_id(&self) -> Option<RowId> {
        self.row.map(|row| self.data.row_ids[row])
    }

    pub fn is_empty_record(&self) -> bool {
        self.row.is_none()
    }

    pub fn get(&self, col: &str) -> CellValue {
        let Some(row) = self.row else {
            return CellValue::Null;
        };
        if col == "id" {
            return CellValue::Int(self.data.row_ids[row]);
        }
        self.data
            .cell(col, row)
            .cloned()
            .unwrap_or(CellValue::Null)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let Some(row) = self.row else {
            return serde_json::json!({});
        };
        let mut map = serde_json::Map::new();
        map.insert("id".into(), serde_json::json!(self.data.row_ids[row]));
        for (col, values) in &self.data.columns {
            let value = values.get(row).map_or(serde_json::Value::Null, CellValue::to_json);
            map.insert(col.clone(), value);
        }
        serde_json::Value::Object(map)
    }
}

/// Filtered fetch of a table from the authoritative store: rows whose value in
/// each filter column is one of the listed values. No filters means the whole
/// table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableQuery {
    pub table_id: String,
    pub filters: BTreeMap<String, Vec<CellValue>>,
}

impl TableQuery {
    pub fn all(table_id: &str) -> Self {
        Self {
            table_id: table_id.to_string(),
            filters: BTreeMap::new(),
        }
    }

    pub fn filtered(table_id: &str, col: &str, values: Vec<CellValue>) -> Self {
        let mut query = Self::all(table_id);
        query.filters.insert(col.to_string(), values);
        query
    }
}
