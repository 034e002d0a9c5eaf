use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Row identifier within a table. Zero is never a live row; censoring uses it
/// as the null reference.
pub type RowId = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(CompactString),
    /// Reference to a row of another table.
    Reference(RowId),
    List(Vec<CellValue>),
    /// Sentinel delivered in place of cell contents the recipient may not see.
    Censored,
}

impl CellValue {
    pub fn text(s: &str) -> Self {
        CellValue::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// JSON image of the value, as seen by lookup-key normalization and by
    /// record serialization. References carry just the row id.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Null | CellValue::Censored => serde_json::Value::Null,
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
            CellValue::Int(v) => serde_json::Value::from(*v),
            CellValue::Float(v) => {
                serde_json::Number::from_f64(*v).map_or(serde_json::Value::Null, Into::into)
            }
            CellValue::Text(s) => serde_json::Value::String(s.to_string()),
            CellValue::Reference(r) => serde_json::Value::from(*r),
            CellValue::List(items) => {
                serde_json::Value::Array(items.iter().map(CellValue::to_json).collect())
            }
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            CellValue::Null => 0,
            CellValue::Bool(_) => 1,
            CellValue::Int(_) => 2,
            CellValue::Float(_) => 3,
            CellValue::Text(_) => 4,
            CellValue::Reference(_) => 5,
            CellValue::List(_) => 6,
            CellValue::Censored => 7,
        }
    }
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CellValue {}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }
        match (self, other) {
            (CellValue::Null, CellValue::Null) => Ordering::Equal,
            (CellValue::Bool(a), CellValue::Bool(b)) => a.cmp(b),
            (CellValue::Int(a), CellValue::Int(b)) => a.cmp(b),
            (CellValue::Float(a), CellValue::Float(b)) => a.total_cmp(b),
            (CellValue::Text(a), CellValue::Text(b)) => a.cmp(b),
            (CellValue::Reference(a), CellValue::Reference(b)) => a.cmp(b),
            (CellValue::List(a), CellValue::List(b)) => a.cmp(b),
            (CellValue::Censored, CellValue::Censored) => Ordering::Equal,
            _ => Ordering::Equal,
        }
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.into())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v.into())
    }
}

#[cfg(test)]
mod tests {
    use super::CellValue;

    #[test]
    fn ordering_is_total_across_kinds() {
        let mut values = vec![
            CellValue::text("b"),
            CellValue::Int(2),
            CellValue::Null,
            CellValue::Float(f64::NAN),
            CellValue::Bool(true),
            CellValue::Reference(7),
        ];
        values.sort();
        assert_eq!(values[0], CellValue::Null);
        assert_eq!(values[1], CellValue::Bool(true));
        // NaN compares via total order rather than poisoning the sort.
        assert!(values.iter().any(|v| matches!(v, CellValue::Float(_))));
    }

    #[test]
    fn json_image_collapses_reference_to_id() {
        assert_eq!(CellValue::Reference(12).to_json(), serde_json::json!(12));
        assert_eq!(CellValue::Censored.to_json(), serde_json::Value::Null);
        assert_eq!(
            CellValue::List(vec![CellValue::Int(1), CellValue::text("x")]).to_json(),
            serde_json::json!([1, "x"])
        );
    }
}
