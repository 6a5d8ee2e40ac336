//! SQLite adapter over rusqlite, driven from blocking tasks.

use crate::guard::{enforce_limit, validate_sql, SQLITE_BLOCKED};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value as JsonValue;
use sibyl_core::{
    ColumnInfo, ConnectionConfig, DatabaseKind, ExecOptions, QueryResult, TableInfo,
};
use sibyl_error::{AdapterError, AdapterErrorKind, SibylResult};
use sibyl_interface::DatabaseAdapter;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

static DIALECT_HINTS: &str = r#"SQLite SQL dialect:
- Use double quotes for identifiers: "column_name"
- String concatenation: || operator (e.g., col1 || ' ' || col2)
- Case-insensitive matching: LIKE (case-insensitive by default for ASCII)
- Date functions: date(), time(), datetime(), julianday(), strftime()
- Current time: datetime('now'), date('now')
- Date formatting: strftime('%Y-%m-%d', date_column)
- Pagination: LIMIT n OFFSET m
- Boolean values: 0 and 1 (no native boolean type)
- NULL handling: IFNULL(column, default), NULLIF(a, b), COALESCE()
- String functions: LENGTH(), SUBSTR(), TRIM(), UPPER(), LOWER(), REPLACE()
- Aggregate functions: COUNT(), SUM(), AVG(), MIN(), MAX(), GROUP_CONCAT()
- Use single quotes for strings
- No native ENUM type - use CHECK constraints
- AUTOINCREMENT with INTEGER PRIMARY KEY
- No RIGHT JOIN or FULL OUTER JOIN support (use LEFT JOIN alternatives)"#;

/// SQLite back-end. The connection config's `database` field is the file
/// path; network fields are ignored. A single connection is held behind a
/// mutex and every call runs on the blocking pool.
#[derive(Debug)]
pub struct SqliteAdapter {
    conn: tokio::sync::Mutex<Option<Arc<Mutex<Connection>>>>,
}

impl SqliteAdapter {
    /// Creates a disconnected adapter.
    pub fn new() -> Self {
        Self { conn: tokio::sync::Mutex::new(None) }
    }

    async fn handle(&self) -> SibylResult<Arc<Mutex<Connection>>> {
        self.conn
            .lock()
            .await
            .clone()
            .ok_or_else(|| AdapterError::new(AdapterErrorKind::NotConnected).into())
    }

    async fn run<T, F>(&self, f: F) -> SibylResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AdapterError> + Send + 'static,
    {
        let handle = self.handle().await?;
        tokio::task::spawn_blocking(move || {
            let conn = handle.lock().map_err(|_| {
                AdapterError::new(AdapterErrorKind::Query("connection mutex poisoned".into()))
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())))?
        .map_err(Into::into)
    }
}

impl Default for SqliteAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn cell_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => JsonValue::from(f),
        ValueRef::Text(t) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        // Byte blobs normalize to strings for JSON transport.
        ValueRef::Blob(b) => JsonValue::String(String::from_utf8_lossy(b).into_owned()),
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    fn database_kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    fn dialect_hints(&self) -> &'static str {
        DIALECT_HINTS
    }

    #[instrument(skip_all, fields(path = %config.database()))]
    async fn connect(&self, config: &ConnectionConfig) -> SibylResult<()> {
        let path = config.database().clone();
        if path.is_empty() {
            return Err(
                AdapterError::new(AdapterErrorKind::Connect("database file path is required".into()))
                    .into(),
            );
        }

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, AdapterError> {
            let conn = Connection::open(&path)
                .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")
                .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))?;
            conn.busy_timeout(std::time::Duration::from_secs(5))
                .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))?;
            // Ping before handing the connection out.
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))?;
            Ok(conn)
        })
        .await
        .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))??;

        *self.conn.lock().await = Some(Arc::new(Mutex::new(conn)));
        debug!("sqlite connection opened");
        Ok(())
    }

    async fn close(&self) -> SibylResult<()> {
        self.conn.lock().await.take();
        Ok(())
    }

    async fn health_check(&self) -> SibylResult<()> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())))
        })
        .await
    }

    async fn list_tables(&self) -> SibylResult<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                     ORDER BY name",
                )
                .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;
            Ok(names)
        })
        .await
    }

    async fn describe_table(&self, table: &str) -> SibylResult<TableInfo> {
        let table = table.to_string();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(&format!("PRAGMA table_info('{}')", table.replace('\'', "''")))
                .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;

            let columns = stmt
                .query_map([], |row| {
                    let name: String = row.get(1)?;
                    let data_type: String = row.get(2)?;
                    let not_null: i64 = row.get(3)?;
                    let pk: i64 = row.get(5)?;
                    Ok(ColumnInfo {
                        name,
                        data_type,
                        nullable: not_null == 0,
                        primary_key: pk > 0,
                        description: String::new(),
                    })
                })
                .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;

            if columns.is_empty() {
                return Err(AdapterError::new(AdapterErrorKind::Introspection(format!(
                    "table not found: {table}"
                ))));
            }

            let row_count = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM \"{}\"", table.replace('"', "\"\"")),
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .ok();

            Ok(TableInfo {
                name: table.clone(),
                schema_name: String::new(),
                columns,
                row_count,
            })
        })
        .await
    }

    async fn schema_ddl(&self) -> SibylResult<String> {
        // sqlite_master stores the original CREATE TABLE text, already
        // dialect-valid; concatenate it verbatim.
        self.run(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT sql FROM sqlite_master
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL
                     ORDER BY name",
                )
                .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;
            let statements = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;

            let mut ddl = String::new();
            for statement in statements {
                ddl.push_str(&statement);
                ddl.push_str(";\n\n");
            }
            Ok(ddl)
        })
        .await
    }

    fn validate_query(&self, sql: &str) -> SibylResult<()> {
        validate_sql(sql, Some(&SQLITE_BLOCKED))
    }

    #[instrument(skip(self, sql), fields(max_rows = opts.max_rows))]
    async fn execute_query(&self, sql: &str, opts: ExecOptions) -> SibylResult<QueryResult> {
        self.validate_query(sql)?;
        // The +1 probe row is how truncation gets detected.
        let sql = enforce_limit(sql, opts.max_rows.saturating_add(1), "LIMIT");
        let max = opts.max_rows as usize;

        let work = self.run(move |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())))?;
            let columns: Vec<String> =
                stmt.column_names().iter().map(|c| c.to_string()).collect();
            let column_count = columns.len();

            let mut rows = stmt
                .query([])
                .map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())))?;

            let mut out: Vec<Vec<JsonValue>> = Vec::new();
            let mut truncated = false;
            while let Some(row) = rows
                .next()
                .map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())))?
            {
                if out.len() >= max {
                    truncated = true;
                    break;
                }
                let mut cells = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    let value = row
                        .get_ref(i)
                        .map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())))?;
                    cells.push(cell_to_json(value));
                }
                out.push(cells);
            }

            Ok(QueryResult {
                columns,
                row_count: out.len(),
                rows: out,
                truncated,
            })
        });

        match tokio::time::timeout(opts.timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                Err(AdapterError::new(AdapterErrorKind::Timeout(opts.timeout.as_secs())).into())
            }
        }
    }
}
