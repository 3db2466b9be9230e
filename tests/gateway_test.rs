//! Integration tests for the table gateway against SQLite:
//! schema-validated CRUD, filtered reads, paging and error cases.

use rowgate::{DaoError, Database, Row, TableGateway};
use serde_json::json;
use tempfile::NamedTempFile;

async fn setup_gateway() -> TableGateway {
    let db_path = NamedTempFile::new()
        .unwrap()
        .into_temp_path()
        .keep()
        .unwrap();
    let mut db = Database::new();
    db.connect_sqlite(db_path.to_str().unwrap(), None)
        .await
        .unwrap();
    db.execute(
        "CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, qty INTEGER)",
    )
    .await
    .unwrap();
    TableGateway::new(db, "items")
}

fn item(name: &str, qty: i64) -> Row {
    let mut row = Row::new();
    row.insert("name".to_string(), json!(name));
    row.insert("qty".to_string(), json!(qty));
    row
}

#[tokio::test]
async fn test_create_then_get_by_id_round_trip() {
    let mut items = setup_gateway().await;

    let stored = items.create(&item("bolt", 10)).await.unwrap();
    assert_eq!(stored["id"], json!(1));
    assert_eq!(stored["name"], json!("bolt"));
    assert_eq!(stored["qty"], json!(10));

    let fetched = items.get_by_id(&json!(1), false).await.unwrap();
    assert_eq!(fetched, stored);
}

#[tokio::test]
async fn test_create_with_unknown_column_writes_nothing() {
    let mut items = setup_gateway().await;
    items.create(&item("bolt", 10)).await.unwrap();

    let mut bad = item("nut", 5);
    bad.insert("color".to_string(), json!("red"));
    let err = items.create(&bad).await.unwrap_err();
    assert!(matches!(err, DaoError::Validation { .. }));
    assert!(items.last_error().contains("color"));

    assert_eq!(items.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_changes_only_named_columns() {
    let mut items = setup_gateway().await;
    let stored = items.create(&item("bolt", 10)).await.unwrap();

    let mut change = Row::new();
    change.insert("id".to_string(), stored["id"].clone());
    change.insert("qty".to_string(), json!(99));
    let updated = items.update(&change).await.unwrap();

    assert_eq!(updated["qty"], json!(99));
    assert_eq!(updated["name"], json!("bolt"));
}

#[tokio::test]
async fn test_update_without_id_is_rejected() {
    let mut items = setup_gateway().await;
    items.create(&item("bolt", 10)).await.unwrap();

    let err = items.update(&item("bolt", 99)).await.unwrap_err();
    assert!(matches!(err, DaoError::Usage(_)));

    let rows = items.find(&Row::new(), "", None).await.unwrap();
    assert_eq!(rows[0]["qty"], json!(10));
}

#[tokio::test]
async fn test_save_updates_existing_and_creates_missing() {
    let mut items = setup_gateway().await;

    // No id: insert.
    let first = items.save(&item("bolt", 10)).await.unwrap();
    assert_eq!(items.count().await.unwrap(), 1);

    // Existing id: update in place, no duplicate.
    let mut change = item("bolt", 20);
    change.insert("id".to_string(), first["id"].clone());
    let saved = items.save(&change).await.unwrap();
    assert_eq!(saved["qty"], json!(20));
    assert_eq!(items.count().await.unwrap(), 1);

    // Unknown id: falls through to insert and keeps the given id.
    let mut fresh = item("nut", 5);
    fresh.insert("id".to_string(), json!(42));
    let created = items.save(&fresh).await.unwrap();
    assert_eq!(created["id"], json!(42));
    assert_eq!(items.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_delete_requires_a_unique_existing_id() {
    let mut items = setup_gateway().await;
    items.create(&item("bolt", 10)).await.unwrap();

    let err = items.delete(&json!("")).await.unwrap_err();
    assert!(matches!(err, DaoError::Usage(_)));

    let err = items.delete(&json!(999)).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(items.count().await.unwrap(), 1);

    items.delete(&json!(1)).await.unwrap();
    assert_eq!(items.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_refuses_non_unique_match() {
    let mut items = setup_gateway().await;
    items.create(&item("dup", 1)).await.unwrap();
    items.create(&item("dup", 2)).await.unwrap();

    items.set_id_column("name");
    let err = items.delete(&json!("dup")).await.unwrap_err();
    assert!(matches!(err, DaoError::Usage(_)));
    assert_eq!(items.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_delete_all_resets_the_id_sequence() {
    let mut items = setup_gateway().await;
    items.create(&item("a", 1)).await.unwrap();
    items.create(&item("b", 2)).await.unwrap();

    let deleted = items.delete_all().await.unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(items.count().await.unwrap(), 0);

    let fresh = items.create(&item("c", 3)).await.unwrap();
    assert_eq!(fresh["id"], json!(1));
}

#[tokio::test]
async fn test_counting_and_paging_over_five_rows() {
    let mut items = setup_gateway().await;
    for n in 1..=5 {
        items.create(&item(&format!("value{}", n), n)).await.unwrap();
    }

    assert_eq!(items.count().await.unwrap(), 5);

    let mut filter = Row::new();
    filter.insert("name".to_string(), json!("value3"));
    assert!(items.exists(&filter).await.unwrap());
    assert!(items.is_unique(&filter).await.unwrap());

    let first = items.find_first(&filter, "").await.unwrap();
    assert_eq!(first["qty"], json!(3));

    let limited = items.find(&Row::new(), "id", Some(2)).await.unwrap();
    assert_eq!(limited.len(), 2);

    let page1 = items
        .find_page(&Row::new(), "id", Some(3), Some(0), false)
        .await
        .unwrap();
    let page2 = items
        .find_page(&Row::new(), "id", Some(3), Some(3), false)
        .await
        .unwrap();
    assert_eq!(page1.len(), 3);
    assert_eq!(page2.len(), 2);
    assert_eq!(page1[0]["name"], json!("value1"));
    assert_eq!(page2[0]["name"], json!("value4"));
}

#[tokio::test]
async fn test_join_clause_applies_only_when_requested() {
    let mut items = setup_gateway().await;
    items
        .db()
        .execute(
            "CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, item_id INTEGER, label TEXT)",
        )
        .await
        .unwrap();
    items.create(&item("bolt", 10)).await.unwrap();
    items
        .db()
        .execute("INSERT INTO tags (item_id, label) VALUES (1, 'a'), (1, 'b')")
        .await
        .unwrap();

    items.set_join_clause("INNER JOIN tags ON tags.item_id = items.id");

    // Plain lookups stay join-free even with a clause configured.
    assert_eq!(items.find(&Row::new(), "", None).await.unwrap().len(), 1);
    assert_eq!(items.get_all("", None).await.unwrap().len(), 1);
    let first = items.find_first(&Row::new(), "").await.unwrap();
    assert!(first.get("label").is_none());

    // find_page opts in and sees one row per joined tag.
    let joined = items
        .find_page(&Row::new(), "", None, None, true)
        .await
        .unwrap();
    assert_eq!(joined.len(), 2);
}

#[tokio::test]
async fn test_find_first_with_no_match_is_an_empty_row() {
    let mut items = setup_gateway().await;
    let mut filter = Row::new();
    filter.insert("name".to_string(), json!("nothing"));
    let row = items.find_first(&filter, "").await.unwrap();
    assert!(row.is_empty());
}

#[tokio::test]
async fn test_get_by_id_on_missing_row_is_not_found() {
    let mut items = setup_gateway().await;
    let err = items.get_by_id(&json!(7), false).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(items.last_error().contains("items"));
}

#[tokio::test]
async fn test_offset_without_limit_is_rejected() {
    let mut items = setup_gateway().await;
    let err = items
        .find_page(&Row::new(), "", None, Some(2), false)
        .await
        .unwrap_err();
    assert!(matches!(err, DaoError::Usage(_)));
}

#[tokio::test]
async fn test_column_override_replaces_catalog_lookup() {
    let mut items = setup_gateway().await;

    let live = items.table_columns().await.unwrap();
    assert_eq!(live, vec!["id", "name", "qty"]);

    items.set_column_override(vec!["id".to_string(), "name".to_string()]);
    // qty is a real column but the override no longer lists it.
    let err = items.create(&item("bolt", 10)).await.unwrap_err();
    assert!(matches!(err, DaoError::Validation { .. }));

    items.clear_column_override();
    items.create(&item("bolt", 10)).await.unwrap();
}

#[tokio::test]
async fn test_check_binding_parameters_reports_without_failing() {
    let mut items = setup_gateway().await;

    assert!(items
        .check_binding_parameters(&item("bolt", 1))
        .await
        .unwrap());

    let mut bad = Row::new();
    bad.insert("color".to_string(), json!("red"));
    assert!(!items.check_binding_parameters(&bad).await.unwrap());
    assert!(items.last_error().contains("color"));
}

#[tokio::test]
async fn test_gateway_exposes_db_for_transactions() {
    let mut items = setup_gateway().await;

    items.db().begin().await.unwrap();
    items.create(&item("bolt", 10)).await.unwrap();
    items.db().rollback().await.unwrap();

    assert_eq!(items.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_set_table_retargets_the_gateway() {
    let mut items = setup_gateway().await;
    items
        .db()
        .execute("CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, label TEXT)")
        .await
        .unwrap();

    items.set_table("tags");
    assert_eq!(items.table(), "tags");

    let mut tag = Row::new();
    tag.insert("label".to_string(), json!("new"));
    let stored = items.create(&tag).await.unwrap();
    assert_eq!(stored["label"], json!("new"));
}
