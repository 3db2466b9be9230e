//! Prepared statement handles.
//!
//! A [`PreparedStatement`] is an owned value returned by
//! [`Database::prepare`](crate::Database::prepare), not hidden connection
//! state: two in-flight prepared queries cannot be conflated because each
//! lives in its own handle, and a handle simply drops when discarded.
//!
//! Statements may use named markers (`:col`) or positional markers (`?`);
//! both are resolved through the same binding API. At prepare time markers
//! are rewritten to the driver's native placeholder form (`$1..$n` for
//! PostgreSQL, `?` otherwise) and their order is recorded.

use crate::db::connection::DriverKind;
use crate::error::{DaoError, DaoResult};
use crate::models::{SharedParam, SqlParam};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// A marker slot in statement order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Marker {
    /// `:name` marker, keyed by name without the colon.
    Named(String),
    /// `?` marker, keyed by 1-based position among `?` markers.
    Positional(usize),
}

enum Bind {
    /// Value captured when `bind_value` was called.
    Value(SqlParam),
    /// Cell read at execute time.
    Shared(SharedParam),
}

/// A parameterized statement bound to one driver's placeholder syntax.
pub struct PreparedStatement {
    sql: String,
    markers: Vec<Marker>,
    binds: HashMap<Marker, Bind>,
    driver: DriverKind,
}

impl PreparedStatement {
    /// Rewrite markers for `driver` and record their order. The SQL is not
    /// validated here; [`Database::prepare`](crate::Database::prepare) runs a
    /// driver prepare before handing the statement out.
    pub(crate) fn parse(sql: &str, driver: DriverKind) -> Self {
        let (rewritten, markers) = rewrite_markers(sql, driver);
        Self {
            sql: rewritten,
            markers,
            binds: HashMap::new(),
            driver,
        }
    }

    /// The statement text with driver-native placeholders.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Driver this statement was prepared against.
    pub fn driver(&self) -> DriverKind {
        self.driver
    }

    /// Number of markers in the statement.
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Bind a value to a named marker. Accepts the name with or without the
    /// leading colon.
    pub fn bind_value(
        &mut self,
        marker: &str,
        value: impl Into<SqlParam>,
    ) -> DaoResult<()> {
        let key = self.named_key(marker)?;
        self.binds.insert(key, Bind::Value(value.into()));
        Ok(())
    }

    /// Bind a value to a positional (`?`) marker by 1-based index.
    pub fn bind_index(&mut self, index: usize, value: impl Into<SqlParam>) -> DaoResult<()> {
        let key = self.positional_key(index)?;
        self.binds.insert(key, Bind::Value(value.into()));
        Ok(())
    }

    /// Bind a live cell to a named marker; its value is read at execute time.
    pub fn bind_shared(&mut self, marker: &str, shared: &SharedParam) -> DaoResult<()> {
        let key = self.named_key(marker)?;
        self.binds.insert(key, Bind::Shared(shared.clone()));
        Ok(())
    }

    /// Bind a live cell to a positional marker by 1-based index.
    pub fn bind_shared_index(&mut self, index: usize, shared: &SharedParam) -> DaoResult<()> {
        let key = self.positional_key(index)?;
        self.binds.insert(key, Bind::Shared(shared.clone()));
        Ok(())
    }

    /// Resolve the parameter list for one execution.
    ///
    /// Call-time arguments, when present, fill all markers positionally after
    /// flattening one level of array arguments. Otherwise every marker must
    /// have been bound.
    pub(crate) fn resolve(&self, args: &[JsonValue]) -> DaoResult<Vec<SqlParam>> {
        if !args.is_empty() {
            let params = SqlParam::flatten(args);
            if params.len() != self.markers.len() {
                return Err(DaoError::usage(format!(
                    "parameter count mismatch: statement has {} markers, got {} values",
                    self.markers.len(),
                    params.len()
                )));
            }
            return Ok(params);
        }

        self.markers
            .iter()
            .map(|marker| match self.binds.get(marker) {
                Some(Bind::Value(v)) => Ok(v.clone()),
                Some(Bind::Shared(cell)) => Ok(cell.get()),
                None => Err(DaoError::usage(format!(
                    "no value bound for marker {}",
                    describe_marker(marker)
                ))),
            })
            .collect()
    }

    fn named_key(&self, marker: &str) -> DaoResult<Marker> {
        let name = marker.strip_prefix(':').unwrap_or(marker);
        let key = Marker::Named(name.to_string());
        if self.markers.contains(&key) {
            Ok(key)
        } else {
            Err(DaoError::usage(format!("unknown marker ':{}'", name)))
        }
    }

    fn positional_key(&self, index: usize) -> DaoResult<Marker> {
        let key = Marker::Positional(index);
        if self.markers.contains(&key) {
            Ok(key)
        } else {
            Err(DaoError::usage(format!("unknown marker position {}", index)))
        }
    }
}

fn describe_marker(marker: &Marker) -> String {
    match marker {
        Marker::Named(name) => format!("':{}'", name),
        Marker::Positional(i) => format!("position {}", i),
    }
}

/// Scan `sql` for `:name` and `?` markers outside string literals and rewrite
/// them to the driver's placeholder form. A `::` sequence (PostgreSQL cast)
/// is never treated as a marker.
fn rewrite_markers(sql: &str, driver: DriverKind) -> (String, Vec<Marker>) {
    let mut out = String::with_capacity(sql.len());
    let mut markers = Vec::new();
    let mut positional = 0usize;
    let mut chars = sql.chars().peekable();
    let mut in_quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = in_quote {
            out.push(c);
            if c == q {
                in_quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                in_quote = Some(c);
                out.push(c);
            }
            '?' => {
                positional += 1;
                markers.push(Marker::Positional(positional));
                push_placeholder(&mut out, driver, markers.len());
            }
            ':' => {
                // "::" is a cast, not a marker
                if chars.peek() == Some(&':') {
                    out.push(c);
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                    continue;
                }
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    out.push(c);
                } else {
                    markers.push(Marker::Named(name));
                    push_placeholder(&mut out, driver, markers.len());
                }
            }
            _ => out.push(c),
        }
    }

    (out, markers)
}

fn push_placeholder(out: &mut String, driver: DriverKind, ordinal: usize) {
    match driver {
        DriverKind::Postgres => {
            out.push('$');
            out.push_str(&ordinal.to_string());
        }
        DriverKind::Sqlite | DriverKind::MySql => out.push('?'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_named_markers_rewritten_for_sqlite() {
        let stmt = PreparedStatement::parse(
            "SELECT * FROM users WHERE name=:name AND age>:age",
            DriverKind::Sqlite,
        );
        assert_eq!(stmt.sql(), "SELECT * FROM users WHERE name=? AND age>?");
        assert_eq!(stmt.marker_count(), 2);
    }

    #[test]
    fn test_markers_numbered_for_postgres() {
        let stmt = PreparedStatement::parse(
            "INSERT INTO t (a, b, c) VALUES (:a, ?, :c)",
            DriverKind::Postgres,
        );
        assert_eq!(stmt.sql(), "INSERT INTO t (a, b, c) VALUES ($1, $2, $3)");
    }

    #[test]
    fn test_quoted_text_is_not_a_marker() {
        let stmt = PreparedStatement::parse(
            "SELECT ':fake' AS lit FROM t WHERE a = :real AND b = '?'",
            DriverKind::Sqlite,
        );
        assert_eq!(
            stmt.sql(),
            "SELECT ':fake' AS lit FROM t WHERE a = ? AND b = '?'"
        );
        assert_eq!(stmt.marker_count(), 1);
    }

    #[test]
    fn test_postgres_cast_is_not_a_marker() {
        let stmt =
            PreparedStatement::parse("SELECT a::text FROM t WHERE b = :b", DriverKind::Postgres);
        assert_eq!(stmt.sql(), "SELECT a::text FROM t WHERE b = $1");
        assert_eq!(stmt.marker_count(), 1);
    }

    #[test]
    fn test_bind_unknown_marker_is_usage_error() {
        let mut stmt = PreparedStatement::parse("SELECT :a", DriverKind::Sqlite);
        assert!(stmt.bind_value(":a", 1i64).is_ok());
        assert!(matches!(
            stmt.bind_value(":missing", 1i64),
            Err(DaoError::Usage(_))
        ));
        assert!(matches!(stmt.bind_index(2, 1i64), Err(DaoError::Usage(_))));
    }

    #[test]
    fn test_resolve_prefers_call_time_args() {
        let mut stmt = PreparedStatement::parse("SELECT :a, :b", DriverKind::Sqlite);
        stmt.bind_value(":a", "bound").unwrap();
        stmt.bind_value(":b", "bound").unwrap();

        let params = stmt.resolve(&[json!("x"), json!("y")]).unwrap();
        assert_eq!(
            params,
            vec![SqlParam::Text("x".into()), SqlParam::Text("y".into())]
        );
    }

    #[test]
    fn test_resolve_flattens_array_args_one_level() {
        let stmt = PreparedStatement::parse("SELECT ?, ?, ?", DriverKind::Sqlite);
        let params = stmt.resolve(&[json!([1, 2]), json!(3)]).unwrap();
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_resolve_count_mismatch() {
        let stmt = PreparedStatement::parse("SELECT ?, ?", DriverKind::Sqlite);
        assert!(matches!(
            stmt.resolve(&[json!(1)]),
            Err(DaoError::Usage(_))
        ));
    }

    #[test]
    fn test_resolve_uses_binds_and_shared_cells() {
        let mut stmt = PreparedStatement::parse("SELECT :a, ?", DriverKind::Sqlite);
        let cell = SharedParam::new(1i64);
        stmt.bind_shared(":a", &cell).unwrap();
        stmt.bind_index(1, "fixed").unwrap();

        cell.set(2i64);
        let params = stmt.resolve(&[]).unwrap();
        assert_eq!(
            params,
            vec![SqlParam::Int(2), SqlParam::Text("fixed".into())]
        );
    }

    #[test]
    fn test_resolve_unbound_marker_is_usage_error() {
        let stmt = PreparedStatement::parse("SELECT :a", DriverKind::Sqlite);
        assert!(matches!(stmt.resolve(&[]), Err(DaoError::Usage(_))));
    }
}
