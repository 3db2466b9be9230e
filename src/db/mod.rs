//! Database access: connection handling, statement execution, cursors and
//! transaction control.

pub mod connection;
pub mod cursor;
pub mod executor;
pub mod schema;
pub mod statement;
pub mod transaction;

pub use connection::{Database, DriverKind};
pub use cursor::Cursor;
pub use schema::SchemaInspector;
pub use statement::PreparedStatement;
