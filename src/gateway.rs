//! Generic table gateway.
//!
//! A [`TableGateway`] binds a [`Database`] to one table and one identifier
//! column and offers schema-validated CRUD on top of the statement executor.
//! Filters are plain [`Row`] maps interpreted as conjunctive equality
//! predicates; values always travel through bound parameters, never through
//! string interpolation.
//!
//! Column validation consults the live catalog on every write so an
//! `ALTER TABLE` is picked up immediately. Tests (or callers with a fixed
//! schema) can bypass the catalog with [`TableGateway::set_column_override`].

use crate::db::{Database, DriverKind, SchemaInspector};
use crate::error::{DaoError, DaoResult};
use crate::models::{Row, SqlParam};
use serde_json::Value as JsonValue;

/// Schema-validated CRUD access to a single table.
pub struct TableGateway {
    db: Database,
    table: String,
    id_column: String,
    join_clause: String,
    column_override: Option<Vec<String>>,
}

impl TableGateway {
    /// Bind `db` to `table` with the default identifier column `"id"`.
    pub fn new(db: Database, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
            id_column: "id".to_string(),
            join_clause: String::new(),
            column_override: None,
        }
    }

    /// Retarget the gateway at another table.
    pub fn set_table(&mut self, table: impl Into<String>) {
        self.table = table.into();
        self.column_override = None;
    }

    /// The table this gateway is bound to.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Use a different identifier column (default `"id"`).
    pub fn set_id_column(&mut self, column: impl Into<String>) {
        self.id_column = column.into();
    }

    /// SQL joined after the table name in read operations that opt in
    /// ([`TableGateway::find_page`] and [`TableGateway::get_by_id`]), e.g.
    /// `"LEFT JOIN roles ON roles.id = users.role_id"`. Empty disables it.
    pub fn set_join_clause(&mut self, clause: impl Into<String>) {
        self.join_clause = clause.into();
    }

    /// Validate writes against this column list instead of the live catalog.
    pub fn set_column_override(&mut self, columns: Vec<String>) {
        self.column_override = Some(columns);
    }

    /// Go back to live catalog validation.
    pub fn clear_column_override(&mut self) {
        self.column_override = None;
    }

    /// The underlying connection, e.g. for transaction control.
    pub fn db(&mut self) -> &mut Database {
        &mut self.db
    }

    /// Message of the most recently failed operation on this gateway.
    pub fn last_error(&self) -> &str {
        self.db.last_error()
    }

    // --- reads ---

    /// Total number of rows in the table.
    pub async fn count(&mut self) -> DaoResult<u64> {
        self.count_filtered(&Row::new()).await
    }

    /// Whether at least one row matches `filter`.
    pub async fn exists(&mut self, filter: &Row) -> DaoResult<bool> {
        Ok(self.count_filtered(filter).await? >= 1)
    }

    /// Whether exactly one row matches `filter`.
    pub async fn is_unique(&mut self, filter: &Row) -> DaoResult<bool> {
        Ok(self.count_filtered(filter).await? == 1)
    }

    /// All rows matching `filter`, every key an equality predicate joined
    /// with AND. An empty filter matches the whole table. `order` is passed
    /// through as the ORDER BY body; empty means unordered. The configured
    /// join clause does not apply here; use [`TableGateway::find_page`] to
    /// opt in.
    pub async fn find(
        &mut self,
        filter: &Row,
        order: &str,
        limit: Option<u64>,
    ) -> DaoResult<Vec<Row>> {
        self.find_page(filter, order, limit, None, false).await
    }

    /// One page of rows matching `filter`.
    ///
    /// `offset` requires `limit`; the drivers disagree on OFFSET without
    /// LIMIT. `with_join` controls whether the configured join clause is
    /// applied.
    pub async fn find_page(
        &mut self,
        filter: &Row,
        order: &str,
        limit: Option<u64>,
        offset: Option<u64>,
        with_join: bool,
    ) -> DaoResult<Vec<Row>> {
        self.db.begin_op();
        if offset.is_some() && limit.is_none() {
            return self.gw_fail(DaoError::usage("offset requires a limit"));
        }

        let mut sql = format!("SELECT * FROM {}", self.table);
        if with_join && !self.join_clause.is_empty() {
            sql.push(' ');
            sql.push_str(&self.join_clause);
        }
        sql.push_str(&where_clause(filter));
        if !order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        if let Some(n) = offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }

        self.query_filtered(&sql, filter).await
    }

    /// The first row matching `filter`, or an empty row when nothing does.
    pub async fn find_first(&mut self, filter: &Row, order: &str) -> DaoResult<Row> {
        let mut rows = self.find_page(filter, order, Some(1), None, false).await?;
        Ok(rows.pop().unwrap_or_default())
    }

    /// Every row of the table, optionally ordered and limited.
    pub async fn get_all(&mut self, order: &str, limit: Option<u64>) -> DaoResult<Vec<Row>> {
        self.find_page(&Row::new(), order, limit, None, false).await
    }

    /// The single row whose identifier equals `id`.
    ///
    /// Anything other than exactly one match is a NotFound failure.
    pub async fn get_by_id(&mut self, id: &JsonValue, with_join: bool) -> DaoResult<Row> {
        self.db.begin_op();

        let mut sql = format!("SELECT * FROM {}", self.table);
        if with_join && !self.join_clause.is_empty() {
            sql.push(' ');
            sql.push_str(&self.join_clause);
        }
        // Qualified so a joined table's identifier cannot shadow ours.
        sql.push_str(&format!(
            " WHERE {}.{} = :{}",
            self.table, self.id_column, self.id_column
        ));

        let mut stmt = self.db.prepare(&sql).await?;
        if let Err(e) = stmt.bind_value(&self.id_column, SqlParam::from_json(id)) {
            return self.gw_fail(e);
        }
        let mut rows = self.db.query_prepared(&stmt, &[]).await?;

        if rows.len() == 1 {
            Ok(rows.remove(0))
        } else {
            self.gw_fail(DaoError::not_found(
                &self.table,
                &self.id_column,
                value_text(id),
            ))
        }
    }

    // --- writes ---

    /// Insert `data` as a new row and return the row as stored.
    ///
    /// Every key must be a column of the table; an unknown key fails the
    /// whole insert before any write happens.
    pub async fn create(&mut self, data: &Row) -> DaoResult<Row> {
        self.db.begin_op();
        if data.is_empty() {
            return self.gw_fail(DaoError::usage("create requires at least one column value"));
        }
        self.validate_columns(data).await?;

        let keys: Vec<&str> = data.keys().map(String::as_str).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            keys.join(", "),
            keys.iter()
                .map(|k| format!(":{}", k))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let stmt = self.bind_all(&sql, data).await?;
        self.db.execute_prepared(&stmt, &[]).await?;

        let id = match data.get(&self.id_column) {
            Some(given) if !is_empty_value(given) => given.clone(),
            _ => JsonValue::from(self.generated_id().await?),
        };
        self.get_by_id(&id, false).await
    }

    /// Update the row addressed by the identifier key in `data` and return
    /// it as stored. The identifier key must be present and non-empty.
    pub async fn update(&mut self, data: &Row) -> DaoResult<Row> {
        self.db.begin_op();

        let id = match data.get(&self.id_column) {
            Some(v) if !is_empty_value(v) => v.clone(),
            _ => {
                return self.gw_fail(DaoError::usage(format!(
                    "update requires a non-empty '{}' value",
                    self.id_column
                )));
            }
        };
        self.validate_columns(data).await?;

        let assignments: Vec<String> = data
            .keys()
            .filter(|k| *k != &self.id_column)
            .map(|k| format!("{} = :{}", k, k))
            .collect();
        if assignments.is_empty() {
            return self.gw_fail(DaoError::usage("update requires a column besides the id"));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = :{}",
            self.table,
            assignments.join(", "),
            self.id_column,
            self.id_column
        );
        let stmt = self.bind_all(&sql, data).await?;
        self.db.execute_prepared(&stmt, &[]).await?;

        self.get_by_id(&id, false).await
    }

    /// Update when the identifier key addresses an existing row, otherwise
    /// insert. A present identifier for a row that does not exist yet falls
    /// through to the insert path and keeps the given identifier.
    pub async fn save(&mut self, data: &Row) -> DaoResult<Row> {
        let id = data.get(&self.id_column).cloned();
        if let Some(id) = id.filter(|v| !is_empty_value(v)) {
            match self.get_by_id(&id, false).await {
                Ok(_) => return self.update(data).await,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        self.create(data).await
    }

    /// Delete the single row whose identifier equals `id`.
    ///
    /// Fails without deleting when `id` is empty, matches no row, or matches
    /// more than one row.
    pub async fn delete(&mut self, id: &JsonValue) -> DaoResult<()> {
        self.db.begin_op();
        if is_empty_value(id) {
            return self.gw_fail(DaoError::usage(format!(
                "delete requires a non-empty '{}' value",
                self.id_column
            )));
        }

        let mut filter = Row::new();
        filter.insert(self.id_column.clone(), id.clone());
        match self.count_filtered(&filter).await? {
            0 => {
                return self.gw_fail(DaoError::not_found(
                    &self.table,
                    &self.id_column,
                    value_text(id),
                ));
            }
            1 => {}
            n => {
                return self.gw_fail(DaoError::usage(format!(
                    "{} = '{}' matches {} rows in table '{}', refusing to delete",
                    self.id_column,
                    value_text(id),
                    n,
                    self.table
                )));
            }
        }

        let sql = format!(
            "DELETE FROM {} WHERE {} = :{}",
            self.table, self.id_column, self.id_column
        );
        let stmt = self.bind_all(&sql, &filter).await?;
        self.db.execute_prepared(&stmt, &[]).await?;

        if self.count_filtered(&filter).await? > 0 {
            return self.gw_fail(DaoError::driver(format!(
                "row {} = '{}' survived its delete",
                self.id_column,
                value_text(id)
            )));
        }
        Ok(())
    }

    /// Delete every row and reset the table's auto-increment counter, so the
    /// next insert starts over at 1. Returns the number of deleted rows.
    pub async fn delete_all(&mut self) -> DaoResult<u64> {
        let affected = self
            .db
            .execute(&format!("DELETE FROM {}", self.table))
            .await?;

        match self.db.driver_kind() {
            Some(DriverKind::Sqlite) => {
                // sqlite_sequence only exists once an AUTOINCREMENT table does
                let has_sequence = self
                    .db
                    .has_result(
                        "SELECT name FROM sqlite_master \
                         WHERE type = 'table' AND name = 'sqlite_sequence'",
                    )
                    .await?;
                if has_sequence {
                    self.db
                        .execute(&format!(
                            "DELETE FROM sqlite_sequence WHERE name = '{}'",
                            self.table.replace('\'', "''")
                        ))
                        .await?;
                }
            }
            Some(DriverKind::MySql) => {
                self.db
                    .execute(&format!("ALTER TABLE {} AUTO_INCREMENT = 1", self.table))
                    .await?;
            }
            Some(DriverKind::Postgres) => {
                // pg_get_serial_sequence is NULL for non-serial ids; setval
                // on NULL is a no-op
                self.db
                    .execute(&format!(
                        "SELECT setval(pg_get_serial_sequence('{}', '{}'), 1, false)",
                        self.table.replace('\'', "''"),
                        self.id_column.replace('\'', "''")
                    ))
                    .await?;
            }
            None => {
                self.db.begin_op();
                return self.gw_fail(DaoError::NotConnected);
            }
        }
        Ok(affected)
    }

    // --- schema ---

    /// Column names of the bound table, from the override list or the live
    /// catalog.
    pub async fn table_columns(&mut self) -> DaoResult<Vec<String>> {
        if let Some(cols) = &self.column_override {
            return Ok(cols.clone());
        }
        SchemaInspector::table_columns(&mut self.db, &self.table).await
    }

    /// Whether every key of `data` names a column of the table. A `false`
    /// answer is retained as the last error but is not itself a failure.
    pub async fn check_binding_parameters(&mut self, data: &Row) -> DaoResult<bool> {
        let columns = self.table_columns().await?;
        for key in data.keys() {
            if !columns.iter().any(|c| c == key) {
                let err = DaoError::validation(&self.table, key);
                self.db.note_error(&err);
                return Ok(false);
            }
        }
        Ok(true)
    }

    // --- internal helpers ---

    async fn validate_columns(&mut self, data: &Row) -> DaoResult<()> {
        let columns = self.table_columns().await?;
        for key in data.keys() {
            if !columns.iter().any(|c| c == key) {
                let err = DaoError::validation(&self.table, key);
                return self.gw_fail(err);
            }
        }
        Ok(())
    }

    async fn count_filtered(&mut self, filter: &Row) -> DaoResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) AS size FROM {}{}",
            self.table,
            where_clause(filter)
        );
        let rows = self.query_filtered(&sql, filter).await?;
        match rows.first().and_then(|r| r.get("size")).and_then(JsonValue::as_u64) {
            Some(n) => Ok(n),
            None => self.gw_fail(DaoError::driver("count returned no usable value")),
        }
    }

    /// Prepare `sql`, bind every filter value to its named marker and fetch.
    async fn query_filtered(&mut self, sql: &str, filter: &Row) -> DaoResult<Vec<Row>> {
        let stmt = self.bind_all(sql, filter).await?;
        self.db.query_prepared(&stmt, &[]).await
    }

    async fn bind_all(
        &mut self,
        sql: &str,
        values: &Row,
    ) -> DaoResult<crate::db::PreparedStatement> {
        let mut stmt = self.db.prepare(sql).await?;
        for (key, value) in values {
            if let Err(e) = stmt.bind_value(key, SqlParam::from_json(value)) {
                return self.gw_fail(e);
            }
        }
        Ok(stmt)
    }

    async fn generated_id(&mut self) -> DaoResult<i64> {
        let sequence = match self.db.driver_kind() {
            Some(DriverKind::Postgres) => {
                Some(format!("{}_{}_seq", self.table, self.id_column))
            }
            _ => None,
        };
        self.db.last_insert_id(sequence.as_deref()).await
    }

    fn gw_fail<T>(&mut self, err: DaoError) -> DaoResult<T> {
        self.db.note_error(&err);
        Err(err)
    }
}

impl std::fmt::Debug for TableGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableGateway")
            .field("table", &self.table)
            .field("id_column", &self.id_column)
            .finish()
    }
}

/// ` WHERE k1 = :k1 AND k2 = :k2` for the filter's keys, empty for an empty
/// filter. Values are bound separately; only column names reach the SQL text.
fn where_clause(filter: &Row) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let predicates: Vec<String> = filter
        .keys()
        .map(|k| format!("{} = :{}", k, k))
        .collect();
    format!(" WHERE {}", predicates.join(" AND "))
}

fn is_empty_value(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        _ => false,
    }
}

fn value_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
