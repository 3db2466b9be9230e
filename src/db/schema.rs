//! Column catalog lookups.
//!
//! The gateway validates incoming data against the live table definition, so
//! the column list is fetched from the driver's catalog on every call rather
//! than cached; a concurrent `ALTER TABLE` is picked up on the next lookup.

use crate::db::connection::{Database, DriverKind};
use crate::error::{DaoError, DaoResult};
use crate::models::SqlParam;
use serde_json::Value as JsonValue;

/// Reads table definitions from the active connection's catalog.
pub struct SchemaInspector;

impl SchemaInspector {
    /// Column names of `table`, in definition order.
    ///
    /// A missing table yields an empty list on every driver; the catalog
    /// queries simply match nothing.
    pub async fn table_columns(db: &mut Database, table: &str) -> DaoResult<Vec<String>> {
        let Some(kind) = db.driver_kind() else {
            db.begin_op();
            return db.fail(DaoError::NotConnected);
        };

        let rows = match kind {
            // PRAGMA arguments cannot be bound
            DriverKind::Sqlite => {
                let sql = format!("PRAGMA table_info('{}')", table.replace('\'', "''"));
                db.run_query(&sql, &[]).await?
            }
            DriverKind::MySql => {
                db.run_query(
                    queries::MYSQL_TABLE_COLUMNS,
                    &[SqlParam::Text(table.to_string())],
                )
                .await?
            }
            DriverKind::Postgres => {
                db.run_query(
                    queries::POSTGRES_TABLE_COLUMNS,
                    &[SqlParam::Text(table.to_string())],
                )
                .await?
            }
        };

        let key = match kind {
            DriverKind::Sqlite => "name",
            DriverKind::MySql => "COLUMN_NAME",
            DriverKind::Postgres => "column_name",
        };
        Ok(rows
            .iter()
            .filter_map(|row| row.get(key).and_then(JsonValue::as_str))
            .map(str::to_string)
            .collect())
    }
}

mod queries {
    pub const MYSQL_TABLE_COLUMNS: &str = "\
        SELECT COLUMN_NAME \
        FROM information_schema.columns \
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = DATABASE() \
        ORDER BY ORDINAL_POSITION";

    pub const POSTGRES_TABLE_COLUMNS: &str = "\
        SELECT column_name \
        FROM information_schema.columns \
        WHERE table_name = $1 AND table_schema = current_schema() \
        ORDER BY ordinal_position";
}
