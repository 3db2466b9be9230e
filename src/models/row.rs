//! Generic row representation.
//!
//! A `Row` is an ordered column-name → value map, produced fresh per fetch
//! and owned by the caller. `serde_json::Map` is built with `preserve_order`
//! enabled, so iteration order is column order and positional access works
//! through [`RowExt::value_at`].

use crate::error::{DaoError, DaoResult};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// One result row: ordered mapping from column name to scalar value.
pub type Row = serde_json::Map<String, JsonValue>;

/// Positional and convenience access over a [`Row`].
pub trait RowExt {
    /// Value of the zero-based `idx`-th column, in result-set column order.
    fn value_at(&self, idx: usize) -> Option<&JsonValue>;

    /// Column names in result-set order.
    fn column_names(&self) -> Vec<&str>;
}

impl RowExt for Row {
    fn value_at(&self, idx: usize) -> Option<&JsonValue> {
        self.values().nth(idx)
    }

    fn column_names(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect()
    }
}

/// Re-express a row as a typed record carrying identical data.
///
/// This is the attribute-style alternative to map-style access: callers
/// define a `Deserialize` struct whose fields are the row's columns.
pub fn row_to_record<T: DeserializeOwned>(row: Row) -> DaoResult<T> {
    serde_json::from_value(JsonValue::Object(row))
        .map_err(|e| DaoError::driver(format!("row projection failed: {}", e)))
}

/// Project every row of a result set into typed records.
pub fn rows_to_records<T: DeserializeOwned>(rows: Vec<Row>) -> DaoResult<Vec<T>> {
    rows.into_iter().map(row_to_record).collect()
}
