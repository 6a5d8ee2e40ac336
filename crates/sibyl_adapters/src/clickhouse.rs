//! ClickHouse adapter over the HTTP protocol with JSONEachRow framing.

use crate::guard::{enforce_limit, validate_sql, CLICKHOUSE_BLOCKED};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use sibyl_core::{
    ColumnInfo, ConnectionConfig, DatabaseKind, ExecOptions, QueryResult, SslMode, TableInfo,
};
use sibyl_error::{AdapterError, AdapterErrorKind, SibylResult};
use sibyl_interface::DatabaseAdapter;
use std::fmt::Write as _;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Beyond this many tables the DDL rendering switches to a commented
/// name-only list for the remainder, to cap prompt size.
const DDL_FULL_TABLE_LIMIT: usize = 10;

static DIALECT_HINTS: &str = r#"ClickHouse SQL dialect:
- Use backticks for identifiers: `column_name`
- String concatenation: concat(a, b) or a || b
- Date functions: today(), now(), toDate(), toDateTime()
- Date truncation: toStartOfMonth(date), toStartOfDay(datetime)
- Date extraction: toYear(date), toMonth(date), toDayOfMonth(date)
- Pagination: LIMIT n OFFSET m (but avoid large offsets)
- Boolean values: 1/0 or true/false
- NULL handling: ifNull(column, default), nullIf(a, b)
- Array functions: arrayJoin(), groupArray(), arrayElement()
- String functions: concat(), substring(), trim(), upper(), lower()
- Aggregate functions: count(), sum(), avg(), min(), max(), groupArray()
- Approximate functions: uniq(), uniqExact(), quantile()
- Use FINAL for ReplacingMergeTree/CollapsingMergeTree when needed
- Avoid SELECT * on large tables, specify columns"#;

/// ClickHouse back-end speaking the HTTP interface: queries go in POST
/// bodies, auth rides in `X-ClickHouse-User` / `X-ClickHouse-Key`
/// headers, and results come back as JSONEachRow lines.
#[derive(Debug)]
pub struct ClickHouseAdapter {
    state: Mutex<Option<HttpClient>>,
}

#[derive(Clone, Debug)]
struct HttpClient {
    base_url: String,
    username: String,
    password: String,
    database: String,
    client: reqwest::Client,
}

impl ClickHouseAdapter {
    /// Creates a disconnected adapter.
    pub fn new() -> Self {
        Self { state: Mutex::new(None) }
    }

    async fn client(&self) -> SibylResult<HttpClient> {
        self.state
            .lock()
            .await
            .clone()
            .ok_or_else(|| AdapterError::new(AdapterErrorKind::NotConnected).into())
    }
}

impl Default for ClickHouseAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    fn from_config(config: &ConnectionConfig) -> SibylResult<Self> {
        let scheme = if config.ssl_mode().is_tls() { "https" } else { "http" };
        Ok(Self {
            base_url: format!("{scheme}://{}:{}", config.host(), config.port()),
            username: config.username().clone(),
            password: config.password().clone(),
            database: config.database().clone(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .danger_accept_invalid_certs(matches!(config.ssl_mode(), SslMode::Require))
                .build()
                .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))?,
        })
    }

    /// POST a query and return the raw response body.
    async fn execute(&self, query: &str) -> Result<String, AdapterError> {
        let response = self
            .client
            .post(&self.base_url)
            .query(&[("database", self.database.as_str())])
            .header("X-ClickHouse-User", &self.username)
            .header("X-ClickHouse-Key", &self.password)
            .header("Content-Type", "text/plain")
            .body(query.to_string())
            .send()
            .await
            .map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())))?;
        if !status.is_success() {
            return Err(AdapterError::new(AdapterErrorKind::Query(format!(
                "clickhouse error (HTTP {status}): {body}"
            ))));
        }
        Ok(body)
    }

    /// Execute with `FORMAT JSONEachRow` appended when the query names no
    /// format of its own, parsing one JSON object per line.
    async fn query_rows(&self, query: &str) -> Result<Vec<Map<String, JsonValue>>, AdapterError> {
        let query = if query.to_uppercase().contains("FORMAT") {
            query.to_string()
        } else {
            format!("{query} FORMAT JSONEachRow")
        };

        let body = self.execute(&query).await?;
        let mut rows = Vec::new();
        for line in body.lines() {
            if line.is_empty() {
                continue;
            }
            let row: Map<String, JsonValue> = serde_json::from_str(line)
                .map_err(|e| AdapterError::new(AdapterErrorKind::Decode(e.to_string())))?;
            rows.push(row);
        }
        Ok(rows)
    }
}

fn string_cell(row: &Map<String, JsonValue>, key: &str) -> String {
    match row.get(key) {
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

// JSONEachRow quotes 64-bit integers by default, so numeric system-table
// cells may arrive as strings.
fn int_cell(row: &Map<String, JsonValue>, key: &str) -> Option<i64> {
    match row.get(key) {
        Some(JsonValue::Number(n)) => n.as_i64(),
        Some(JsonValue::String(s)) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl DatabaseAdapter for ClickHouseAdapter {
    fn database_kind(&self) -> DatabaseKind {
        DatabaseKind::ClickHouse
    }

    fn dialect_hints(&self) -> &'static str {
        DIALECT_HINTS
    }

    #[instrument(skip_all, fields(host = %config.host(), database = %config.database()))]
    async fn connect(&self, config: &ConnectionConfig) -> SibylResult<()> {
        let client = HttpClient::from_config(config)?;
        client
            .execute("SELECT 1")
            .await
            .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))?;
        *self.state.lock().await = Some(client);
        debug!("clickhouse http client established");
        Ok(())
    }

    async fn close(&self) -> SibylResult<()> {
        self.state.lock().await.take();
        Ok(())
    }

    async fn health_check(&self) -> SibylResult<()> {
        let client = self.client().await?;
        client.execute("SELECT 1").await?;
        Ok(())
    }

    async fn list_tables(&self) -> SibylResult<Vec<String>> {
        let client = self.client().await?;
        let rows = client
            .query_rows(
                "SELECT name FROM system.tables
                 WHERE database = currentDatabase()
                   AND engine NOT IN ('View', 'MaterializedView')
                 ORDER BY name",
            )
            .await
            .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;
        Ok(rows.iter().map(|row| string_cell(row, "name")).collect())
    }

    async fn describe_table(&self, table: &str) -> SibylResult<TableInfo> {
        let client = self.client().await?;
        let escaped = table.replace('\'', "\\'");
        let rows = client
            .query_rows(&format!(
                "SELECT name, type, is_in_primary_key, comment
                 FROM system.columns
                 WHERE database = currentDatabase() AND table = '{escaped}'
                 ORDER BY position"
            ))
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
                let data_type = string_cell(row, "type");
                ColumnInfo {
                    name: string_cell(row, "name"),
                    nullable: data_type.starts_with("Nullable("),
                    primary_key: int_cell(row, "is_in_primary_key").unwrap_or(0) != 0,
                    description: string_cell(row, "comment"),
                    data_type,
                }
            })
            .collect();

        let row_count = client
            .query_rows(&format!(
                "SELECT total_rows FROM system.tables
                 WHERE database = currentDatabase() AND name = '{escaped}'"
            ))
            .await
            .ok()
            .and_then(|rows| rows.first().and_then(|r| int_cell(r, "total_rows")));

        Ok(TableInfo {
            name: table.to_string(),
            schema_name: String::new(),
            columns,
            row_count,
        })
    }

    async fn schema_ddl(&self) -> SibylResult<String> {
        let client = self.client().await?;
        let rows = client
            .query_rows(
                "SELECT table, name, type, is_in_primary_key
                 FROM system.columns
                 WHERE database = currentDatabase()
                 ORDER BY table, position",
            )
            .await
            .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;

        // Group columns per table, preserving the lexicographic table order.
        let mut tables: Vec<(String, Vec<(String, String, bool)>)> = Vec::new();
        for row in &rows {
            let table = string_cell(row, "table");
            let column = (
                string_cell(row, "name"),
                string_cell(row, "type"),
                int_cell(row, "is_in_primary_key").unwrap_or(0) != 0,
            );
            match tables.last_mut() {
                Some((name, columns)) if *name == table => columns.push(column),
                _ => tables.push((table, vec![column])),
            }
        }

        let mut ddl = String::new();
        for (name, columns) in tables.iter().take(DDL_FULL_TABLE_LIMIT) {
            let _ = writeln!(ddl, "CREATE TABLE `{name}` (");
            for (i, (column, data_type, pk)) in columns.iter().enumerate() {
                let sep = if i + 1 < columns.len() { "," } else { "" };
                let pk = if *pk { " -- PRIMARY KEY" } else { "" };
                let _ = writeln!(ddl, "  `{column}` {data_type}{sep}{pk}");
            }
            ddl.push_str(");\n\n");
        }

        if tables.len() > DDL_FULL_TABLE_LIMIT {
            ddl.push_str("-- Additional tables (columns omitted):\n");
            for (name, _) in tables.iter().skip(DDL_FULL_TABLE_LIMIT) {
                let _ = writeln!(ddl, "-- `{name}`");
            }
        }

        Ok(ddl.trim_end().to_string())
    }

    fn validate_query(&self, sql: &str) -> SibylResult<()> {
        validate_sql(sql, Some(&CLICKHOUSE_BLOCKED))
    }

    #[instrument(skip(self, sql), fields(max_rows = opts.max_rows))]
    async fn execute_query(&self, sql: &str, opts: ExecOptions) -> SibylResult<QueryResult> {
        self.validate_query(sql)?;
        // The +1 probe row is how truncation gets detected.
        let sql = enforce_limit(sql, opts.max_rows.saturating_add(1), "LIMIT");

        let client = self.client().await?;
        let rows = match tokio::time::timeout(opts.timeout, client.query_rows(&sql)).await {
            Ok(rows) => rows?,
            Err(_) => {
                return Err(
                    AdapterError::new(AdapterErrorKind::Timeout(opts.timeout.as_secs())).into()
                )
            }
        };

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();

        let max = opts.max_rows as usize;
        let truncated = rows.len() > max;
        let out: Vec<Vec<JsonValue>> = rows
            .into_iter()
            .take(max)
            .map(|mut row| {
                columns
                    .iter()
                    .map(|col| row.remove(col).unwrap_or(JsonValue::Null))
                    .collect()
            })
            .collect();

        Ok(QueryResult {
            columns,
            row_count: out.len(),
            rows: out,
            truncated,
        })
    }
}
