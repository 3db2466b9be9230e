//! Data model shared across the access layer.

pub mod param;
pub mod row;

pub use param::{SharedParam, SqlParam};
pub use row::{Row, RowExt, row_to_record, rows_to_records};
