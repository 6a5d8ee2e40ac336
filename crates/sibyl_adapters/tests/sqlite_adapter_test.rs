//! Round-trip tests for the SQLite adapter against a real database file.

use sibyl_adapters::SqliteAdapter;
use sibyl_core::{ConnectionConfig, ExecOptions, SslMode};
use sibyl_interface::DatabaseAdapter;
use std::time::Duration;

fn temp_db_path(tag: &str) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("sibyl-sqlite-{tag}-{}.db", uuid::Uuid::new_v4()));
    path
}

fn config_for(path: &std::path::Path) -> ConnectionConfig {
    ConnectionConfig::new(
        "",
        0,
        path.to_string_lossy().into_owned(),
        "",
        "",
        SslMode::Disable,
        100,
        30,
    )
}

async fn seeded_adapter(tag: &str) -> (SqliteAdapter, std::path::PathBuf) {
    let path = temp_db_path(tag);
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);
             CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER, total REAL);
             INSERT INTO users (id, email) VALUES (1, 'a@x.io'), (2, 'b@x.io'), (3, 'c@x.io');",
        )
        .unwrap();
    }

    let adapter = SqliteAdapter::new();
    adapter.connect(&config_for(&path)).await.unwrap();
    (adapter, path)
}

#[tokio::test]
async fn lists_exactly_the_created_tables() {
    let (adapter, path) = seeded_adapter("list").await;

    let tables = adapter.list_tables().await.unwrap();
    assert_eq!(tables, vec!["orders".to_string(), "users".to_string()]);

    adapter.close().await.unwrap();
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn describes_columns_with_primary_keys() {
    let (adapter, path) = seeded_adapter("describe").await;

    let info = adapter.describe_table("users").await.unwrap();
    assert_eq!(info.name, "users");
    assert_eq!(info.row_count, Some(3));

    let id = info.columns.iter().find(|c| c.name == "id").unwrap();
    assert!(id.primary_key);
    let email = info.columns.iter().find(|c| c.name == "email").unwrap();
    assert!(!email.primary_key);
    assert!(!email.nullable);

    assert!(adapter.describe_table("missing").await.is_err());

    adapter.close().await.unwrap();
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn schema_ddl_concatenates_create_statements() {
    let (adapter, path) = seeded_adapter("ddl").await;

    let ddl = adapter.schema_ddl().await.unwrap();
    assert!(ddl.contains("CREATE TABLE users"));
    assert!(ddl.contains("CREATE TABLE orders"));

    adapter.close().await.unwrap();
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn executes_bounded_queries() {
    let (adapter, path) = seeded_adapter("exec").await;

    let opts = ExecOptions { max_rows: 100, timeout: Duration::from_secs(5) };
    let result = adapter.execute_query("SELECT COUNT(*) FROM users", opts).await.unwrap();
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0][0], serde_json::json!(3));
    assert!(!result.truncated);

    adapter.close().await.unwrap();
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn truncates_and_flags_at_max_rows() {
    let (adapter, path) = seeded_adapter("truncate").await;

    let opts = ExecOptions { max_rows: 2, timeout: Duration::from_secs(5) };
    let result = adapter.execute_query("SELECT id FROM users", opts).await.unwrap();
    assert_eq!(result.row_count, 2);
    assert!(result.truncated);

    // A cap above the row count leaves the flag unset.
    let opts = ExecOptions { max_rows: 10, timeout: Duration::from_secs(5) };
    let result = adapter.execute_query("SELECT id FROM users", opts).await.unwrap();
    assert_eq!(result.row_count, 3);
    assert!(!result.truncated);

    adapter.close().await.unwrap();
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn rejects_unsafe_sql_without_executing() {
    let (adapter, path) = seeded_adapter("guard").await;

    let opts = ExecOptions { max_rows: 100, timeout: Duration::from_secs(5) };
    for sql in ["DROP TABLE users", "DELETE FROM users", "ATTACH DATABASE 'x' AS y"] {
        assert!(adapter.execute_query(sql, opts).await.is_err(), "{sql}");
    }

    // The table is untouched.
    let result = adapter
        .execute_query("SELECT COUNT(*) FROM users", opts)
        .await
        .unwrap();
    assert_eq!(result.rows[0][0], serde_json::json!(3));

    adapter.close().await.unwrap();
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn existing_limit_is_honored() {
    let (adapter, path) = seeded_adapter("limit").await;

    let opts = ExecOptions { max_rows: 100, timeout: Duration::from_secs(5) };
    let result = adapter
        .execute_query("SELECT id FROM users LIMIT 1", opts)
        .await
        .unwrap();
    assert_eq!(result.row_count, 1);
    assert!(!result.truncated);

    adapter.close().await.unwrap();
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn health_check_follows_lifecycle() {
    let (adapter, path) = seeded_adapter("health").await;

    adapter.health_check().await.unwrap();
    adapter.close().await.unwrap();
    assert!(adapter.health_check().await.is_err());

    // close is idempotent
    adapter.close().await.unwrap();
    let _ = std::fs::remove_file(path);
}
