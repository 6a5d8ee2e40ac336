//! MySQL adapter over sqlx.

use crate::guard::{enforce_limit, validate_sql, MYSQL_BLOCKED};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sibyl_core::{
    ColumnInfo, ConnectionConfig, DatabaseKind, ExecOptions, QueryResult, SslMode, TableInfo,
};
use sibyl_error::{AdapterError, AdapterErrorKind, SibylResult};
use sibyl_interface::DatabaseAdapter;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Row, TypeInfo};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

static DIALECT_HINTS: &str = r#"MySQL SQL dialect:
- Use backticks for identifiers: `column_name`
- String concatenation: CONCAT(a, b)
- Case-insensitive matching: LIKE (MySQL is case-insensitive by default)
- Date functions: NOW(), CURDATE(), CURRENT_TIMESTAMP
- Date formatting: DATE_FORMAT(date, '%Y-%m-%d')
- Date extraction: YEAR(date), MONTH(date), DAY(date)
- Pagination: LIMIT n OFFSET m or LIMIT offset, count
- Boolean values: TRUE/FALSE or 1/0
- NULL handling: IFNULL(column, default), NULLIF(a, b), COALESCE()
- String functions: CONCAT(), SUBSTRING(), TRIM(), UPPER(), LOWER()
- Aggregate functions: COUNT(), SUM(), AVG(), MIN(), MAX(), GROUP_CONCAT()
- Use single quotes for strings
- Avoid using reserved words as identifiers
- EXPLAIN for query analysis"#;

/// MySQL back-end.
#[derive(Debug)]
pub struct MySqlAdapter {
    pool: Mutex<Option<MySqlPool>>,
}

impl MySqlAdapter {
    /// Creates a disconnected adapter.
    pub fn new() -> Self {
        Self { pool: Mutex::new(None) }
    }

    async fn pool(&self) -> SibylResult<MySqlPool> {
        self.pool
            .lock()
            .await
            .clone()
            .ok_or_else(|| AdapterError::new(AdapterErrorKind::NotConnected).into())
    }
}

impl Default for MySqlAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn mysql_cell_to_json(row: &MySqlRow, idx: usize) -> JsonValue {
    let type_name = row.columns()[idx].type_info().name().to_uppercase();
    let value = match type_name.as_str() {
        "BOOLEAN" => row.try_get::<Option<bool>, _>(idx).map(|v| v.map(JsonValue::from)),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<Option<i64>, _>(idx).map(|v| v.map(JsonValue::from))
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row.try_get::<Option<u64>, _>(idx).map(|v| v.map(JsonValue::from)),
        "FLOAT" => row.try_get::<Option<f32>, _>(idx).map(|v| v.map(JsonValue::from)),
        "DOUBLE" => row.try_get::<Option<f64>, _>(idx).map(|v| v.map(JsonValue::from)),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map(|v| v.map(|d| JsonValue::String(d.to_string()))),
        "DATETIME" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map(|v| v.map(|t| JsonValue::String(t.to_string()))),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map(|v| v.map(|t| JsonValue::String(t.to_rfc3339()))),
        // Byte blobs normalize to strings for JSON transport.
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .map(|v| v.map(|b| JsonValue::String(String::from_utf8_lossy(&b).into_owned()))),
        _ => row
            .try_get::<Option<String>, _>(idx)
            .map(|v| v.map(JsonValue::String)),
    };

    match value {
        Ok(Some(v)) => v,
        Ok(None) => JsonValue::Null,
        Err(e) => {
            debug!(column_type = %type_name, error = %e, "undecodable cell, emitting null");
            JsonValue::Null
        }
    }
}

#[async_trait]
impl DatabaseAdapter for MySqlAdapter {
    fn database_kind(&self) -> DatabaseKind {
        DatabaseKind::MySql
    }

    fn dialect_hints(&self) -> &'static str {
        DIALECT_HINTS
    }

    #[instrument(skip_all, fields(host = %config.host(), database = %config.database()))]
    async fn connect(&self, config: &ConnectionConfig) -> SibylResult<()> {
        let ssl_mode = match config.ssl_mode() {
            SslMode::Disable => MySqlSslMode::Disabled,
            SslMode::Require => MySqlSslMode::Required,
            SslMode::VerifyCa => MySqlSslMode::VerifyCa,
            SslMode::VerifyFull => MySqlSslMode::VerifyIdentity,
        };

        let options = MySqlConnectOptions::new()
            .host(config.host())
            .port(*config.port())
            .database(config.database())
            .username(config.username())
            .password(config.password())
            .ssl_mode(ssl_mode);

        let pool = MySqlPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))?;

        *self.pool.lock().await = Some(pool);
        debug!("mysql pool established");
        Ok(())
    }

    async fn close(&self) -> SibylResult<()> {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }
        Ok(())
    }

    async fn health_check(&self) -> SibylResult<()> {
        let pool = self.pool().await?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map(|_| ())
            .map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())).into())
    }

    async fn list_tables(&self) -> SibylResult<Vec<String>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT table_name AS name FROM information_schema.tables
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE'
             ORDER BY table_name",
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;

        Ok(rows
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?)
    }

    async fn describe_table(&self, table: &str) -> SibylResult<TableInfo> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT column_name AS name, data_type, is_nullable, column_key, column_comment
             FROM information_schema.columns
             WHERE table_schema = DATABASE() AND table_name = ?
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&pool)
        .await
        .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;

        if rows.is_empty() {
            return Err(AdapterError::new(AdapterErrorKind::Introspection(format!(
                "table not found: {table}"
            )))
            .into());
        }

        let columns: Vec<ColumnInfo> = rows
            .iter()
            .map(|row| {
                Ok(ColumnInfo {
                    name: row.try_get::<String, _>("name")?,
                    data_type: row.try_get::<String, _>("data_type")?,
                    nullable: row.try_get::<String, _>("is_nullable")? == "YES",
                    primary_key: row.try_get::<String, _>("column_key")? == "PRI",
                    description: row.try_get::<String, _>("column_comment").unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;

        let row_count = sqlx::query(
            "SELECT table_rows FROM information_schema.tables
             WHERE table_schema = DATABASE() AND table_name = ?",
        )
        .bind(table)
        .fetch_optional(&pool)
        .await
        .ok()
        .flatten()
        .and_then(|row| row.try_get::<Option<u64>, _>("table_rows").ok().flatten())
        .map(|n| n as i64);

        Ok(TableInfo {
            name: table.to_string(),
            schema_name: String::new(),
            columns,
            row_count,
        })
    }

    async fn schema_ddl(&self) -> SibylResult<String> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT table_name AS tbl, column_name AS col, data_type, is_nullable, column_key
             FROM information_schema.columns
             WHERE table_schema = DATABASE()
             ORDER BY table_name, ordinal_position",
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;

        let mut ddl = String::new();
        let mut current_table = String::new();
        for row in &rows {
            let table: String = row
                .try_get("tbl")
                .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;
            let column: String = row
                .try_get("col")
                .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;
            let data_type: String = row
                .try_get("data_type")
                .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;
            let is_nullable: String = row
                .try_get("is_nullable")
                .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;
            let column_key: String = row.try_get("column_key").unwrap_or_default();

            if table != current_table {
                if !current_table.is_empty() {
                    ddl.push_str("\n);\n\n");
                }
                ddl.push_str(&format!("CREATE TABLE `{table}` (\n"));
                current_table = table;
            } else {
                ddl.push_str(",\n");
            }

            let nullable = if is_nullable == "NO" { " NOT NULL" } else { "" };
            let pk = if column_key == "PRI" { " PRIMARY KEY" } else { "" };
            ddl.push_str(&format!("  `{column}` {data_type}{nullable}{pk}"));
        }
        if !current_table.is_empty() {
            ddl.push_str("\n);");
        }

        Ok(ddl)
    }

    fn validate_query(&self, sql: &str) -> SibylResult<()> {
        validate_sql(sql, Some(&MYSQL_BLOCKED))
    }

    #[instrument(skip(self, sql), fields(max_rows = opts.max_rows))]
    async fn execute_query(&self, sql: &str, opts: ExecOptions) -> SibylResult<QueryResult> {
        self.validate_query(sql)?;
        // The +1 probe row is how truncation gets detected.
        let sql = enforce_limit(sql, opts.max_rows.saturating_add(1), "LIMIT");

        let pool = self.pool().await?;
        let rows = match tokio::time::timeout(opts.timeout, sqlx::query(&sql).fetch_all(&pool)).await
        {
            Ok(rows) => {
                rows.map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())))?
            }
            Err(_) => {
                return Err(
                    AdapterError::new(AdapterErrorKind::Timeout(opts.timeout.as_secs())).into()
                )
            }
        };

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let max = opts.max_rows as usize;
        let truncated = rows.len() > max;
        let out: Vec<Vec<JsonValue>> = rows
            .iter()
            .take(max)
            .map(|row| (0..row.columns().len()).map(|i| mysql_cell_to_json(row, i)).collect())
            .collect();

        Ok(QueryResult {
            columns,
            row_count: out.len(),
            rows: out,
            truncated,
        })
    }
}
