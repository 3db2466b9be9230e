//! rowgate: a generic relational-database access layer.
//!
//! One [`Database`] manages a single connection to SQLite, MySQL or
//! PostgreSQL through sqlx and exposes ad-hoc and prepared statement
//! execution, forward-only cursors, and counter-based nested transactions
//! emulated with savepoints. A [`TableGateway`] layers schema-validated CRUD
//! for one table on top.
//!
//! ```no_run
//! use rowgate::{Database, TableGateway};
//!
//! # async fn demo() -> rowgate::DaoResult<()> {
//! let mut db = Database::new();
//! db.connect_sqlite("app.db", None).await?;
//!
//! let mut users = TableGateway::new(db, "users");
//! let mut row = rowgate::Row::new();
//! row.insert("name".to_string(), "ada".into());
//! let stored = users.create(&row).await?;
//! # let _ = stored;
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod error;
pub mod gateway;
pub mod models;

pub use db::{Cursor, Database, DriverKind, PreparedStatement, SchemaInspector};
pub use error::{DaoError, DaoResult};
pub use gateway::TableGateway;
pub use models::{Row, RowExt, SharedParam, SqlParam, row_to_record, rows_to_records};
