//! Statement execution engine.
//!
//! All SQL leaves the crate through [`Database::run_execute`] and
//! [`Database::run_query`]: they expand the table prefix, emit the debug
//! echo, time the execution and dispatch to the driver-specific
//! implementation. The driver submodules below are intentionally parallel so
//! differences between the engines stay obvious.
//!
//! When no parameters are bound the raw (unprepared) protocol is used;
//! some statements (MySQL `BEGIN`/`SAVEPOINT`, SQLite `PRAGMA`) cannot go
//! through a prepared statement.

use crate::db::connection::{Database, DbConn, DriverKind};
use crate::db::cursor::Cursor;
use crate::db::statement::PreparedStatement;
use crate::error::{DaoError, DaoResult};
use crate::models::{Row, SqlParam, rows_to_records};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Instant;
use tracing::debug;

impl Database {
    /// Run a non-query statement. Returns the affected row count.
    pub async fn execute(&mut self, sql: &str) -> DaoResult<u64> {
        self.run_execute(sql, &[]).await
    }

    /// Run an ad-hoc query and fetch every row.
    ///
    /// Zero matching rows is an empty vector, never an error; the two cases
    /// are separated by the driver's own status, which sqlx reports as
    /// distinct `Ok`/`Err` outcomes.
    pub async fn query_rows(&mut self, sql: &str) -> DaoResult<Vec<Row>> {
        self.run_query(sql, &[]).await
    }

    /// Ad-hoc query projected into typed records. Carries the same data as
    /// [`Database::query_rows`], shaped for attribute-style access.
    pub async fn query_rows_as<T: DeserializeOwned>(&mut self, sql: &str) -> DaoResult<Vec<T>> {
        let rows = self.run_query(sql, &[]).await?;
        rows_to_records(rows)
    }

    /// Whether `sql` would yield at least one row.
    pub async fn has_result(&mut self, sql: &str) -> DaoResult<bool> {
        Ok(!self.run_query(sql, &[]).await?.is_empty())
    }

    /// Compile a parameterized statement into an owned handle.
    ///
    /// Markers are rewritten for the active driver and the statement is
    /// prepared against the live connection, so a syntax error fails here
    /// rather than at first execution.
    pub async fn prepare(&mut self, sql: &str) -> DaoResult<PreparedStatement> {
        use sqlx::Executor;

        self.begin_op();
        let expanded = self.expand_prefix(sql);
        let Some(conn) = self.conn.as_mut() else {
            return self.fail(DaoError::NotConnected);
        };
        let stmt = PreparedStatement::parse(&expanded, conn.kind());

        let validated = match conn {
            DbConn::Sqlite(c) => c.prepare(stmt.sql()).await.map(|_| ()),
            DbConn::MySql(c) => c.prepare(stmt.sql()).await.map(|_| ()),
            DbConn::Postgres(c) => c.prepare(stmt.sql()).await.map(|_| ()),
        };
        match validated {
            Ok(()) => Ok(stmt),
            Err(e) => self.fail(e.into()),
        }
    }

    /// Execute a prepared statement and fetch every row.
    ///
    /// `args`, when non-empty, fill all markers positionally (one level of
    /// array arguments is flattened); otherwise previously bound values are
    /// used.
    pub async fn query_prepared(
        &mut self,
        stmt: &PreparedStatement,
        args: &[JsonValue],
    ) -> DaoResult<Vec<Row>> {
        let params = self.resolve_for(stmt, args)?;
        self.run_query(stmt.sql(), &params).await
    }

    /// Prepared query projected into typed records.
    pub async fn query_prepared_as<T: DeserializeOwned>(
        &mut self,
        stmt: &PreparedStatement,
        args: &[JsonValue],
    ) -> DaoResult<Vec<T>> {
        let rows = self.query_prepared(stmt, args).await?;
        rows_to_records(rows)
    }

    /// Execute a prepared non-query statement. Returns the affected rows.
    pub async fn execute_prepared(
        &mut self,
        stmt: &PreparedStatement,
        args: &[JsonValue],
    ) -> DaoResult<u64> {
        let params = self.resolve_for(stmt, args)?;
        self.run_execute(stmt.sql(), &params).await
    }

    /// Open a forward-only cursor over an ad-hoc query.
    pub async fn query_cursor(&mut self, sql: &str) -> DaoResult<Cursor> {
        Ok(Cursor::new(self.run_query(sql, &[]).await?))
    }

    /// Open a forward-only cursor over a prepared statement.
    pub async fn query_cursor_prepared(
        &mut self,
        stmt: &PreparedStatement,
        args: &[JsonValue],
    ) -> DaoResult<Cursor> {
        Ok(Cursor::new(self.query_prepared(stmt, args).await?))
    }

    /// Identifier generated by the most recent INSERT on this connection.
    ///
    /// `sequence` names the PostgreSQL sequence to read; the other drivers
    /// ignore it.
    pub async fn last_insert_id(&mut self, sequence: Option<&str>) -> DaoResult<i64> {
        let sql = match self.driver_kind() {
            Some(DriverKind::Sqlite) => "SELECT last_insert_rowid() AS id".to_string(),
            Some(DriverKind::MySql) => "SELECT LAST_INSERT_ID() AS id".to_string(),
            Some(DriverKind::Postgres) => match sequence {
                Some(seq) => format!("SELECT currval('{}') AS id", seq.replace('\'', "''")),
                None => "SELECT lastval() AS id".to_string(),
            },
            None => {
                self.begin_op();
                return self.fail(DaoError::NotConnected);
            }
        };

        let rows = self.run_query(&sql, &[]).await?;
        match rows.first().and_then(|r| r.get("id")).and_then(JsonValue::as_i64) {
            Some(id) => Ok(id),
            None => self.fail(DaoError::driver("last insert id unavailable")),
        }
    }

    /// Wall-clock duration of the last completed execute/query, in
    /// milliseconds. Fails until one has completed.
    pub fn execution_time_millis(&mut self) -> DaoResult<u64> {
        self.begin_op();
        match self.execution_time {
            Some(t) => Ok(t.as_millis() as u64),
            None => self.fail(DaoError::usage("no execution time available")),
        }
    }

    fn resolve_for(
        &mut self,
        stmt: &PreparedStatement,
        args: &[JsonValue],
    ) -> DaoResult<Vec<SqlParam>> {
        if let Some(kind) = self.driver_kind() {
            if kind != stmt.driver() {
                let err = DaoError::usage(format!(
                    "statement was prepared for driver '{}', connection is '{}'",
                    stmt.driver(),
                    kind
                ));
                return self.fail(err);
            }
        }
        match stmt.resolve(args) {
            Ok(params) => Ok(params),
            Err(e) => self.fail(e),
        }
    }

    // --- central choke points ---

    pub(crate) async fn run_execute(&mut self, sql: &str, params: &[SqlParam]) -> DaoResult<u64> {
        self.begin_op();
        self.execution_time = None;
        let sql = self.expand_prefix(sql);
        self.echo(&sql);
        let started = Instant::now();

        let Some(conn) = self.conn.as_mut() else {
            return self.fail(DaoError::NotConnected);
        };
        let result = match conn {
            DbConn::Sqlite(c) => sqlite::execute(c, &sql, params).await,
            DbConn::MySql(c) => mysql::execute(c, &sql, params).await,
            DbConn::Postgres(c) => postgres::execute(c, &sql, params).await,
        };

        match result {
            Ok(affected) => {
                self.execution_time = Some(started.elapsed());
                debug!(sql = %sql, affected, "execute");
                Ok(affected)
            }
            Err(e) => self.fail(e.into()),
        }
    }

    pub(crate) async fn run_query(&mut self, sql: &str, params: &[SqlParam]) -> DaoResult<Vec<Row>> {
        self.begin_op();
        self.execution_time = None;
        let sql = self.expand_prefix(sql);
        self.echo(&sql);
        let started = Instant::now();

        let Some(conn) = self.conn.as_mut() else {
            return self.fail(DaoError::NotConnected);
        };
        let result = match conn {
            DbConn::Sqlite(c) => sqlite::fetch_rows(c, &sql, params).await,
            DbConn::MySql(c) => mysql::fetch_rows(c, &sql, params).await,
            DbConn::Postgres(c) => postgres::fetch_rows(c, &sql, params).await,
        };

        match result {
            Ok(rows) => {
                self.execution_time = Some(started.elapsed());
                debug!(sql = %sql, rows = rows.len(), "query");
                Ok(rows)
            }
            Err(e) => self.fail(e.into()),
        }
    }
}

// =============================================================================
// Value Decoding
// =============================================================================

/// Logical category for column types, shared by the driver decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Binary,
    Text,
}

fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("float")
        || lower.contains("double")
        || lower.contains("decimal")
        || lower.contains("numeric")
        || lower == "real"
    {
        return TypeCategory::Float;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    // varchar, text, char, date, time, ... all surface as strings
    TypeCategory::Text
}

fn binary_to_json(bytes: Vec<u8>) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_to_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod sqlite {
    use super::*;
    use crate::models::Row;
    use sqlx::sqlite::{SqliteArguments, SqliteRow};
    use sqlx::{Column, Row as _, SqliteConnection, TypeInfo};

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<u64, sqlx::Error> {
        if params.is_empty() {
            use sqlx::Executor;
            return Ok(conn.execute(sql).await?.rows_affected());
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind(query, param);
        }
        Ok(query.execute(conn).await?.rows_affected())
    }

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<Row>, sqlx::Error> {
        let rows: Vec<SqliteRow> = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind(query, param);
            }
            query.fetch_all(conn).await?
        };
        Ok(rows.iter().map(to_row).collect())
    }

    fn bind<'q>(
        query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
        param: &'q SqlParam,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
        match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.as_str()),
        }
    }

    fn to_row(row: &SqliteRow) -> Row {
        use sqlx::ValueRef;

        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                // Expression columns (COUNT(*), literals) carry no declared
                // type; fall back to the runtime type of the value itself.
                let mut type_name = col.type_info().name().to_string();
                if type_name == "NULL" {
                    if let Ok(raw) = row.try_get_raw(idx) {
                        type_name = raw.type_info().name().to_string();
                    }
                }
                let category = categorize_type(&type_name);
                (col.name().to_string(), decode(row, idx, category))
            })
            .collect()
    }

    fn decode(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Integer => row
                .try_get::<Option<i64>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .map(float_to_json)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(binary_to_json)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Text => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}

mod mysql {
    use super::*;
    use crate::models::Row;
    use sqlx::mysql::{MySqlArguments, MySqlRow};
    use sqlx::{Column, MySqlConnection, Row as _, TypeInfo};

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<u64, sqlx::Error> {
        if params.is_empty() {
            use sqlx::Executor;
            return Ok(conn.execute(sql).await?.rows_affected());
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind(query, param);
        }
        Ok(query.execute(conn).await?.rows_affected())
    }

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<Row>, sqlx::Error> {
        let rows: Vec<MySqlRow> = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind(query, param);
            }
            query.fetch_all(conn).await?
        };
        Ok(rows.iter().map(to_row).collect())
    }

    fn bind<'q>(
        query: sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>,
        param: &'q SqlParam,
    ) -> sqlx::query::Query<'q, sqlx::MySql, MySqlArguments> {
        match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.as_str()),
        }
    }

    fn to_row(row: &MySqlRow) -> Row {
        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                (col.name().to_string(), decode(row, idx, category))
            })
            .collect()
    }

    fn decode(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Integer => {
                if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
                    return JsonValue::Number(v.into());
                }
                // Unsigned columns
                if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
                    return JsonValue::Number(v.into());
                }
                JsonValue::Null
            }
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => {
                if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
                    return float_to_json(v);
                }
                if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
                    return float_to_json(v as f64);
                }
                // DECIMAL/NUMERIC surface in their exact text form
                row.try_get::<Option<String>, _>(idx)
                    .ok()
                    .flatten()
                    .map(JsonValue::String)
                    .unwrap_or(JsonValue::Null)
            }
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(binary_to_json)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Text => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}

mod postgres {
    use super::*;
    use crate::models::Row;
    use sqlx::postgres::{PgArguments, PgRow};
    use sqlx::{Column, PgConnection, Row as _, TypeInfo};

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<u64, sqlx::Error> {
        if params.is_empty() {
            use sqlx::Executor;
            return Ok(conn.execute(sql).await?.rows_affected());
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind(query, param);
        }
        Ok(query.execute(conn).await?.rows_affected())
    }

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<Row>, sqlx::Error> {
        let rows: Vec<PgRow> = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind(query, param);
            }
            query.fetch_all(conn).await?
        };
        Ok(rows.iter().map(to_row).collect())
    }

    fn bind<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
        param: &'q SqlParam,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
        match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.as_str()),
        }
    }

    fn to_row(row: &PgRow) -> Row {
        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                (col.name().to_string(), decode(row, idx, category))
            })
            .collect()
    }

    fn decode(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Integer => {
                if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
                    return JsonValue::Number(v.into());
                }
                if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
                    return JsonValue::Number(v.into());
                }
                if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
                    return JsonValue::Number(v.into());
                }
                JsonValue::Null
            }
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => {
                if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
                    return float_to_json(v);
                }
                if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
                    return float_to_json(v as f64);
                }
                JsonValue::Null
            }
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(binary_to_json)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Text => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}
