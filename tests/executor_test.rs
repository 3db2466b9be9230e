//! Integration tests for statement execution against SQLite:
//! ad-hoc queries, prepared statements, cursors and error reporting.

use rowgate::{DaoError, Database, Row, RowExt, SharedParam};
use serde::Deserialize;
use serde_json::json;
use tempfile::NamedTempFile;

async fn setup_db() -> Database {
    let db_path = NamedTempFile::new()
        .unwrap()
        .into_temp_path()
        .keep()
        .unwrap();
    let mut db = Database::new();
    db.connect_sqlite(db_path.to_str().unwrap(), None)
        .await
        .unwrap();
    db.execute("CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, age INTEGER)")
        .await
        .unwrap();
    db
}

#[tokio::test]
async fn test_execute_and_query_rows() {
    let mut db = setup_db().await;

    let affected = db
        .execute("INSERT INTO users (name, age) VALUES ('ada', 36), ('grace', 45)")
        .await
        .unwrap();
    assert_eq!(affected, 2);

    let rows = db
        .query_rows("SELECT name, age FROM users ORDER BY id")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], json!("ada"));
    assert_eq!(rows[1]["age"], json!(45));

    // Columns are also addressable by position.
    assert_eq!(rows[0].value_at(0), Some(&json!("ada")));
    assert_eq!(rows[0].column_names(), vec!["name", "age"]);
}

#[tokio::test]
async fn test_empty_result_is_ok_not_error() {
    let mut db = setup_db().await;
    let rows = db
        .query_rows("SELECT * FROM users WHERE name = 'nobody'")
        .await
        .unwrap();
    assert!(rows.is_empty());
    assert_eq!(db.last_error(), "");
}

#[tokio::test]
async fn test_prepared_statement_with_named_markers() {
    let mut db = setup_db().await;

    let mut insert = db
        .prepare("INSERT INTO users (name, age) VALUES (:name, :age)")
        .await
        .unwrap();
    insert.bind_value(":name", "ada").unwrap();
    insert.bind_value(":age", 36i64).unwrap();
    assert_eq!(db.execute_prepared(&insert, &[]).await.unwrap(), 1);

    let select = db
        .prepare("SELECT age FROM users WHERE name = :name")
        .await
        .unwrap();
    let rows = db.query_prepared(&select, &[json!("ada")]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["age"], json!(36));
}

#[tokio::test]
async fn test_two_prepared_statements_coexist() {
    let mut db = setup_db().await;
    db.execute("INSERT INTO users (name, age) VALUES ('ada', 36)")
        .await
        .unwrap();

    let by_name = db
        .prepare("SELECT * FROM users WHERE name = ?")
        .await
        .unwrap();
    let by_age = db
        .prepare("SELECT * FROM users WHERE age > ?")
        .await
        .unwrap();

    // Using one handle does not disturb the other.
    let rows = db.query_prepared(&by_age, &[json!(30)]).await.unwrap();
    assert_eq!(rows.len(), 1);
    let rows = db.query_prepared(&by_name, &[json!("ada")]).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_shared_param_is_read_at_execute_time() {
    let mut db = setup_db().await;

    let cell = SharedParam::new("first");
    let mut insert = db
        .prepare("INSERT INTO users (name) VALUES (:name)")
        .await
        .unwrap();
    insert.bind_shared(":name", &cell).unwrap();

    db.execute_prepared(&insert, &[]).await.unwrap();
    cell.set("second");
    db.execute_prepared(&insert, &[]).await.unwrap();

    let rows = db
        .query_rows("SELECT name FROM users ORDER BY id")
        .await
        .unwrap();
    assert_eq!(rows[0]["name"], json!("first"));
    assert_eq!(rows[1]["name"], json!("second"));
}

#[tokio::test]
async fn test_cursor_walks_rows_and_closes() {
    let mut db = setup_db().await;
    db.execute("INSERT INTO users (name) VALUES ('a'), ('b'), ('c')")
        .await
        .unwrap();

    let mut cursor = db
        .query_cursor("SELECT name FROM users ORDER BY id")
        .await
        .unwrap();
    assert!(cursor.is_open());
    assert_eq!(cursor.next_row().unwrap()["name"], json!("a"));
    assert_eq!(cursor.remaining(), 2);
    assert_eq!(cursor.next_row().unwrap()["name"], json!("b"));
    assert_eq!(cursor.next_row().unwrap()["name"], json!("c"));
    assert!(cursor.next_row().is_none());
    assert!(!cursor.is_open());
}

#[tokio::test]
async fn test_cursor_from_prepared_statement() {
    let mut db = setup_db().await;
    db.execute("INSERT INTO users (name, age) VALUES ('ada', 36), ('grace', 45)")
        .await
        .unwrap();

    let stmt = db
        .prepare("SELECT name FROM users WHERE age > :age ORDER BY id")
        .await
        .unwrap();
    let cursor = db
        .query_cursor_prepared(&stmt, &[json!(40)])
        .await
        .unwrap();
    let names: Vec<Row> = cursor.collect();
    assert_eq!(names.len(), 1);
    assert_eq!(names[0]["name"], json!("grace"));
}

#[derive(Debug, Deserialize)]
struct User {
    name: String,
    age: i64,
}

#[tokio::test]
async fn test_rows_project_into_typed_records() {
    let mut db = setup_db().await;
    db.execute("INSERT INTO users (name, age) VALUES ('ada', 36)")
        .await
        .unwrap();

    let users: Vec<User> = db
        .query_rows_as("SELECT name, age FROM users")
        .await
        .unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name, "ada");
    assert_eq!(users[0].age, 36);

    let mut cursor = db.query_cursor("SELECT name, age FROM users").await.unwrap();
    let first: Option<User> = cursor.next_record().unwrap();
    assert_eq!(first.unwrap().name, "ada");
}

#[tokio::test]
async fn test_has_result_and_last_insert_id() {
    let mut db = setup_db().await;
    assert!(!db.has_result("SELECT * FROM users").await.unwrap());

    db.execute("INSERT INTO users (name) VALUES ('ada')")
        .await
        .unwrap();
    assert!(db.has_result("SELECT * FROM users").await.unwrap());
    assert_eq!(db.last_insert_id(None).await.unwrap(), 1);

    db.execute("INSERT INTO users (name) VALUES ('grace')")
        .await
        .unwrap();
    assert_eq!(db.last_insert_id(None).await.unwrap(), 2);
}

#[tokio::test]
async fn test_execution_time_tracks_last_statement() {
    let mut db = setup_db().await;
    assert!(matches!(
        db.execution_time_millis(),
        Err(DaoError::Usage(_))
    ));

    db.execute("INSERT INTO users (name) VALUES ('ada')")
        .await
        .unwrap();
    // Any completed statement yields a measurement.
    assert!(db.execution_time_millis().is_ok());
}

#[tokio::test]
async fn test_disconnected_operations_report_not_connected() {
    let mut db = Database::new();
    assert!(matches!(
        db.execute("SELECT 1").await,
        Err(DaoError::NotConnected)
    ));
    assert_eq!(db.last_error(), "no database connected");
}

#[tokio::test]
async fn test_driver_error_is_retained_then_cleared() {
    let mut db = setup_db().await;

    let err = db.execute("THIS IS NOT SQL").await.unwrap_err();
    assert!(matches!(err, DaoError::Driver { .. }));
    assert!(!db.last_error().is_empty());

    db.execute("INSERT INTO users (name) VALUES ('ada')")
        .await
        .unwrap();
    assert_eq!(db.last_error(), "");
}

#[tokio::test]
async fn test_table_prefix_expansion_end_to_end() {
    let db_path = NamedTempFile::new()
        .unwrap()
        .into_temp_path()
        .keep()
        .unwrap();
    let mut db = Database::with_options(false, "app_");
    db.connect_sqlite(db_path.to_str().unwrap(), None)
        .await
        .unwrap();

    db.execute("CREATE TABLE #_notes (id INTEGER PRIMARY KEY, body TEXT)")
        .await
        .unwrap();
    db.execute("INSERT INTO #_notes (body) VALUES ('hi')")
        .await
        .unwrap();
    let rows = db.query_rows("SELECT body FROM app_notes").await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_prepared_count_mismatch_is_usage_error() {
    let mut db = setup_db().await;
    let stmt = db
        .prepare("SELECT * FROM users WHERE name = ? AND age = ?")
        .await
        .unwrap();
    let err = db.query_prepared(&stmt, &[json!("ada")]).await.unwrap_err();
    assert!(matches!(err, DaoError::Usage(_)));
}
