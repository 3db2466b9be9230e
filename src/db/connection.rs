//! Connection management.
//!
//! One [`Database`] owns at most one live driver connection. Connections are
//! established through driver-specific convenience methods or a generic
//! DSN-style [`Database::connect`], and replaced wholesale on re-connect.
//! There is no pooling and no internal locking; callers sharing a `Database`
//! across threads must serialize access themselves.

use crate::error::{DaoError, DaoResult};
use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, MySqlConnection, PgConnection, SqliteConnection};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Identity of the underlying driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Sqlite,
    MySql,
    Postgres,
}

impl DriverKind {
    /// Driver name as reported by [`Database::driver_name`].
    pub fn name(&self) -> &'static str {
        match self {
            DriverKind::Sqlite => "sqlite",
            DriverKind::MySql => "mysql",
            DriverKind::Postgres => "postgres",
        }
    }

    /// Whether nested transactions can be emulated with SAVEPOINTs on this
    /// driver. Adding a new nestable driver is a one-line change here.
    pub fn supports_savepoints(&self) -> bool {
        match self {
            DriverKind::Sqlite => true,
            DriverKind::MySql => true,
            DriverKind::Postgres => true,
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Driver-specific single connection. One handle, no pool.
pub(crate) enum DbConn {
    Sqlite(SqliteConnection),
    MySql(MySqlConnection),
    Postgres(PgConnection),
}

impl DbConn {
    pub(crate) fn kind(&self) -> DriverKind {
        match self {
            DbConn::Sqlite(_) => DriverKind::Sqlite,
            DbConn::MySql(_) => DriverKind::MySql,
            DbConn::Postgres(_) => DriverKind::Postgres,
        }
    }

    async fn close(self) {
        // Best-effort teardown; a failed close leaves nothing to act on.
        let _ = match self {
            DbConn::Sqlite(c) => c.close().await,
            DbConn::MySql(c) => c.close().await,
            DbConn::Postgres(c) => c.close().await,
        };
    }
}

/// Connection manager, statement executor and transaction controller for one
/// database handle.
///
/// Every failable operation clears and, on failure, repopulates the retained
/// last-error message, so [`Database::last_error`] always reflects the most
/// recent failure only.
pub struct Database {
    pub(crate) conn: Option<DbConn>,
    pub(crate) last_error: String,
    pub(crate) execution_time: Option<Duration>,
    pub(crate) tx_level: u32,
    pub(crate) nestable_override: Option<bool>,
    echo_sql: bool,
    table_prefix: String,
}

impl Database {
    /// Create a disconnected manager with default settings.
    pub fn new() -> Self {
        Self::with_options(false, "")
    }

    /// Create a disconnected manager.
    ///
    /// `echo_sql` emits every executed statement on the `rowgate::sql`
    /// tracing target. `table_prefix` replaces the `#_` placeholder in every
    /// statement before execution.
    pub fn with_options(echo_sql: bool, table_prefix: impl Into<String>) -> Self {
        Self {
            conn: None,
            last_error: String::new(),
            execution_time: None,
            tx_level: 0,
            nestable_override: None,
            echo_sql,
            table_prefix: table_prefix.into(),
        }
    }

    /// Connect using a full DSN (`sqlite://...`, `mysql://...`,
    /// `postgres://...`). Optional user/password override any credentials
    /// embedded in the DSN. Replaces a previously held connection.
    pub async fn connect(
        &mut self,
        dsn: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> DaoResult<()> {
        self.begin_op();

        let url = match url::Url::parse(dsn) {
            Ok(u) => u,
            Err(e) => return self.fail(DaoError::driver(format!("invalid DSN: {}", e))),
        };

        match url.scheme() {
            "sqlite" => {
                let opts = match SqliteConnectOptions::from_str(dsn) {
                    Ok(o) => o.create_if_missing(true),
                    Err(e) => return self.fail(e.into()),
                };
                self.install(DriverKind::Sqlite, opts.connect().await.map(DbConn::Sqlite))
                    .await
            }
            "mysql" => {
                let opts = match MySqlConnectOptions::from_str(dsn) {
                    Ok(o) => o,
                    Err(e) => return self.fail(e.into()),
                };
                let opts = apply_credentials(opts, user, password, |o, u| o.username(u), |o, p| {
                    o.password(p)
                });
                self.install(DriverKind::MySql, opts.connect().await.map(DbConn::MySql))
                    .await
            }
            "postgres" | "postgresql" => {
                let opts = match PgConnectOptions::from_str(dsn) {
                    Ok(o) => o,
                    Err(e) => return self.fail(e.into()),
                };
                let opts = apply_credentials(opts, user, password, |o, u| o.username(u), |o, p| {
                    o.password(p)
                });
                self.install(
                    DriverKind::Postgres,
                    opts.connect().await.map(DbConn::Postgres),
                )
                .await
            }
            other => self.fail(DaoError::driver(format!("unsupported driver '{}'", other))),
        }
    }

    /// Connect to an SQLite database file, creating it if missing.
    ///
    /// `busy_timeout` is handed to the driver; it bounds lock waits, not
    /// statement execution.
    pub async fn connect_sqlite(
        &mut self,
        path: &str,
        busy_timeout: Option<Duration>,
    ) -> DaoResult<()> {
        self.begin_op();

        let mut opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        if let Some(t) = busy_timeout {
            opts = opts.busy_timeout(t);
        }
        self.install(DriverKind::Sqlite, opts.connect().await.map(DbConn::Sqlite))
            .await
    }

    /// Connect to a MySQL server. `host` may carry a `:port` suffix.
    pub async fn connect_mysql(
        &mut self,
        host: &str,
        user: &str,
        password: &str,
        database: &str,
        connect_timeout: Option<Duration>,
    ) -> DaoResult<()> {
        self.begin_op();

        let (host, port) = split_host_port(host);
        let mut opts = MySqlConnectOptions::new()
            .host(&host)
            .username(user)
            .password(password)
            .database(database);
        if let Some(port) = port {
            opts = match parse_port(&port) {
                Ok(p) => opts.port(p),
                Err(e) => return self.fail(e),
            };
        }
        self.install_with_timeout(
            DriverKind::MySql,
            connect_timeout,
            async { opts.connect().await.map(DbConn::MySql) },
        )
        .await
    }

    /// Connect to a PostgreSQL server. `host` may carry a `:port` suffix.
    pub async fn connect_postgres(
        &mut self,
        host: &str,
        user: &str,
        password: &str,
        database: &str,
        connect_timeout: Option<Duration>,
    ) -> DaoResult<()> {
        self.begin_op();

        let (host, port) = split_host_port(host);
        let mut opts = PgConnectOptions::new()
            .host(&host)
            .username(user)
            .password(password)
            .database(database);
        if let Some(port) = port {
            opts = match parse_port(&port) {
                Ok(p) => opts.port(p),
                Err(e) => return self.fail(e),
            };
        }
        self.install_with_timeout(
            DriverKind::Postgres,
            connect_timeout,
            async { opts.connect().await.map(DbConn::Postgres) },
        )
        .await
    }

    /// Release the connection. Idempotent; a second call is a no-op.
    pub async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close().await;
            debug!("disconnected");
        }
        self.tx_level = 0;
    }

    /// Whether a connection is currently held.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Name of the active driver ("sqlite", "mysql", "postgres").
    pub fn driver_name(&mut self) -> DaoResult<&'static str> {
        self.begin_op();
        match &self.conn {
            Some(conn) => Ok(conn.kind().name()),
            None => self.fail(DaoError::NotConnected),
        }
    }

    /// Kind of the active driver, if connected.
    pub fn driver_kind(&self) -> Option<DriverKind> {
        self.conn.as_ref().map(DbConn::kind)
    }

    /// Message of the most recently failed operation; empty when the last
    /// failable operation succeeded.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    // --- internal plumbing shared by the executor and transaction modules ---

    /// Clear the retained error at the start of a failable operation.
    pub(crate) fn begin_op(&mut self) {
        self.last_error.clear();
    }

    /// Record a failure and return it.
    pub(crate) fn fail<T>(&mut self, err: DaoError) -> DaoResult<T> {
        self.last_error = err.to_string();
        Err(err)
    }

    /// Retain an error message produced above this layer (gateway checks).
    pub(crate) fn note_error(&mut self, err: &DaoError) {
        self.last_error = err.to_string();
    }

    /// Replace the `#_` placeholder with the configured table prefix.
    pub(crate) fn expand_prefix(&self, sql: &str) -> String {
        if self.table_prefix.is_empty() {
            sql.to_string()
        } else {
            sql.replace("#_", &self.table_prefix)
        }
    }

    /// Debug echo side channel: emit the statement when enabled.
    pub(crate) fn echo(&self, sql: &str) {
        if self.echo_sql {
            tracing::debug!(target: "rowgate::sql", sql = %sql, "sql");
        }
    }

    async fn install(
        &mut self,
        kind: DriverKind,
        result: Result<DbConn, sqlx::Error>,
    ) -> DaoResult<()> {
        match result {
            Ok(conn) => {
                // Re-connecting replaces the prior handle.
                if let Some(old) = self.conn.take() {
                    old.close().await;
                }
                self.conn = Some(conn);
                self.tx_level = 0;
                info!(driver = %kind, "connected");
                Ok(())
            }
            Err(e) => {
                self.conn = None;
                self.fail(e.into())
            }
        }
    }

    async fn install_with_timeout(
        &mut self,
        kind: DriverKind,
        connect_timeout: Option<Duration>,
        fut: impl Future<Output = Result<DbConn, sqlx::Error>>,
    ) -> DaoResult<()> {
        match connect_timeout {
            Some(t) => match timeout(t, fut).await {
                Ok(result) => self.install(kind, result).await,
                Err(_) => {
                    self.conn = None;
                    self.fail(DaoError::timeout("connect", t.as_secs()))
                }
            },
            None => self.install(kind, fut.await).await,
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("driver", &self.conn.as_ref().map(DbConn::kind))
            .field("tx_level", &self.tx_level)
            .finish()
    }
}

fn apply_credentials<O>(
    opts: O,
    user: Option<&str>,
    password: Option<&str>,
    set_user: impl Fn(O, &str) -> O,
    set_password: impl Fn(O, &str) -> O,
) -> O {
    let opts = match user {
        Some(u) => set_user(opts, u),
        None => opts,
    };
    match password {
        Some(p) => set_password(opts, p),
        None => opts,
    }
}

/// Split a "host:port" string into host and optional port text.
///
/// A URI scheme's "://" is not a host/port separator: the search for ':'
/// starts after it.
pub(crate) fn split_host_port(input: &str) -> (String, Option<String>) {
    let scheme_end = input.find("://").map(|i| i + 3).unwrap_or(0);
    match input[scheme_end..].find(':') {
        Some(rel) => {
            let idx = scheme_end + rel;
            (input[..idx].to_string(), Some(input[idx + 1..].to_string()))
        }
        None => (input.to_string(), None),
    }
}

fn parse_port(text: &str) -> DaoResult<u16> {
    text.parse::<u16>()
        .map_err(|_| DaoError::usage(format!("invalid port '{}'", text)))
}
