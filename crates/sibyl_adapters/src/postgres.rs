//! PostgreSQL adapter over tokio-postgres with a small client pool.

use crate::guard::{enforce_limit, validate_sql, POSTGRES_BLOCKED};
use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::ClientConfig;
use serde_json::Value as JsonValue;
use sibyl_core::{
    ColumnInfo, ConnectionConfig, DatabaseKind, ExecOptions, QueryResult, SslMode, TableInfo,
};
use sibyl_error::{AdapterError, AdapterErrorKind, SibylResult};
use sibyl_interface::DatabaseAdapter;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls, Row};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, instrument, warn};

const MAX_CONNS: usize = 5;

static DIALECT_HINTS: &str = r#"PostgreSQL SQL dialect:
- Use double quotes for identifiers with special characters: "column name"
- String concatenation: column1 || column2
- Case-insensitive matching: ILIKE instead of LIKE
- Date/time functions: NOW(), CURRENT_DATE, CURRENT_TIMESTAMP
- Date truncation: DATE_TRUNC('month', date_column)
- Date extraction: EXTRACT(YEAR FROM date_column)
- Pagination: LIMIT n OFFSET m
- Boolean values: TRUE, FALSE
- NULL handling: COALESCE(column, default_value), NULLIF(a, b)
- Array functions: ANY(), ALL(), array_agg()
- JSON functions: jsonb_extract_path(), ->, ->>
- String functions: CONCAT(), SUBSTRING(), TRIM(), UPPER(), LOWER()
- Aggregate functions: COUNT(), SUM(), AVG(), MIN(), MAX(), STRING_AGG()
- Window functions: ROW_NUMBER(), RANK(), DENSE_RANK(), LAG(), LEAD()
- Common table expressions (CTEs): WITH cte AS (SELECT ...)"#;

/// PostgreSQL back-end.
#[derive(Debug)]
pub struct PostgresAdapter {
    pool: Mutex<Option<Arc<PgPool>>>,
}

impl PostgresAdapter {
    /// Creates a disconnected adapter; `connect` establishes the pool.
    pub fn new() -> Self {
        Self { pool: Mutex::new(None) }
    }

    async fn pool(&self) -> SibylResult<Arc<PgPool>> {
        self.pool
            .lock()
            .await
            .clone()
            .ok_or_else(|| AdapterError::new(AdapterErrorKind::NotConnected).into())
    }
}

impl Default for PostgresAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy pool of at most [`MAX_CONNS`] clients; one is opened eagerly on
/// connect so authentication failures surface immediately.
#[derive(Debug)]
struct PgPool {
    config: tokio_postgres::Config,
    tls: PgTls,
    idle: Mutex<Vec<PooledConn>>,
    permits: Arc<Semaphore>,
}

#[derive(Clone)]
enum PgTls {
    None,
    Rustls(MakeRustlsConnect),
}

impl std::fmt::Debug for PgTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PgTls::None => f.write_str("PgTls::None"),
            PgTls::Rustls(_) => f.write_str("PgTls::Rustls"),
        }
    }
}

#[derive(Debug)]
struct PooledConn {
    client: Client,
    driver: JoinHandle<()>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl PgPool {
    async fn open(config: &ConnectionConfig) -> SibylResult<Self> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(config.host())
            .port(*config.port())
            .dbname(config.database())
            .user(config.username())
            .password(config.password())
            .connect_timeout(std::time::Duration::from_secs(10));

        let tls = match config.ssl_mode() {
            SslMode::Disable => PgTls::None,
            mode => PgTls::Rustls(MakeRustlsConnect::new(build_tls_config(*mode)?)),
        };

        let pool = Self {
            config: pg_config,
            tls,
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(MAX_CONNS)),
        };

        // Open and ping one connection up front.
        let conn = pool.checkout().await?;
        pool.checkin(conn).await;
        Ok(pool)
    }

    async fn connect_one(&self, permit: OwnedSemaphorePermit) -> SibylResult<PooledConn> {
        let (client, driver) = match &self.tls {
            PgTls::None => {
                let (client, connection) = self
                    .config
                    .connect(NoTls)
                    .await
                    .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))?;
                let driver = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!(error = %e, "postgres connection task ended");
                    }
                });
                (client, driver)
            }
            PgTls::Rustls(tls) => {
                let (client, connection) = self
                    .config
                    .connect(tls.clone())
                    .await
                    .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))?;
                let driver = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!(error = %e, "postgres connection task ended");
                    }
                });
                (client, driver)
            }
        };

        Ok(PooledConn { client, driver, _permit: permit })
    }

    async fn checkout(&self) -> SibylResult<PooledConn> {
        if let Some(conn) = self.idle.lock().await.pop() {
            if !conn.client.is_closed() {
                return Ok(conn);
            }
            // Dead idle connection; its permit frees on drop.
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdapterError::new(AdapterErrorKind::NotConnected))?;
        self.connect_one(permit).await
    }

    async fn checkin(&self, conn: PooledConn) {
        if !conn.client.is_closed() {
            self.idle.lock().await.push(conn);
        }
    }

    async fn close(&self) {
        self.idle.lock().await.clear();
        self.permits.close();
    }
}

fn build_tls_config(mode: SslMode) -> SibylResult<ClientConfig> {
    let config = match mode {
        SslMode::Require => {
            // TLS without certificate verification; verify-ca / verify-full
            // go through the webpki roots below.
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert::default()))
                .with_no_client_auth()
        }
        _ => {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
    };
    Ok(config)
}

/// Certificate verifier for `ssl_mode = require`: encrypts the channel but
/// accepts any server certificate.
#[derive(Debug)]
struct AcceptAnyCert(rustls::crypto::CryptoProvider);

impl Default for AcceptAnyCert {
    fn default() -> Self {
        Self(rustls::crypto::ring::default_provider())
    }
}

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn pg_cell_to_json(row: &Row, idx: usize) -> JsonValue {
    let ty = row.columns()[idx].type_();
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map(|v| v.map(JsonValue::from)),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx).map(|v| v.map(JsonValue::from)),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx).map(|v| v.map(JsonValue::from)),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(|v| v.map(JsonValue::from)),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx).map(|v| v.map(JsonValue::from)),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map(|v| v.map(JsonValue::from)),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<JsonValue>>(idx),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .map(|v| v.map(|u| JsonValue::String(u.to_string()))),
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map(|v| v.map(|t| JsonValue::String(t.to_string()))),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .map(|v| v.map(|t| JsonValue::String(t.to_rfc3339()))),
        Type::DATE => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .map(|v| v.map(|d| JsonValue::String(d.to_string()))),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .map(|v| v.map(|b| JsonValue::String(String::from_utf8_lossy(&b).into_owned()))),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map(|v| v.map(JsonValue::String)),
    };

    match value {
        Ok(Some(v)) => v,
        Ok(None) => JsonValue::Null,
        Err(e) => {
            debug!(column_type = %ty.name(), error = %e, "undecodable cell, emitting null");
            JsonValue::Null
        }
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn database_kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    fn dialect_hints(&self) -> &'static str {
        DIALECT_HINTS
    }

    #[instrument(skip_all, fields(host = %config.host(), database = %config.database()))]
    async fn connect(&self, config: &ConnectionConfig) -> SibylResult<()> {
        let pool = PgPool::open(config).await?;
        *self.pool.lock().await = Some(Arc::new(pool));
        debug!("postgres pool established");
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
        let conn = pool.checkout().await?;
        let result = conn
            .client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())).into());
        pool.checkin(conn).await;
        result
    }

    async fn list_tables(&self) -> SibylResult<Vec<String>> {
        let pool = self.pool().await?;
        let conn = pool.checkout().await?;
        let rows = conn
            .client
            .query(
                "SELECT table_name
                 FROM information_schema.tables
                 WHERE table_schema = 'public'
                   AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
                &[],
            )
            .await
            .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;
        pool.checkin(conn).await;

        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    async fn describe_table(&self, table: &str) -> SibylResult<TableInfo> {
        let pool = self.pool().await?;
        let conn = pool.checkout().await?;

        let rows = conn
            .client
            .query(
                "SELECT
                     c.column_name,
                     c.data_type,
                     c.is_nullable = 'YES' AS nullable,
                     COALESCE(
                         (SELECT true FROM information_schema.key_column_usage kcu
                          JOIN information_schema.table_constraints tc
                            ON kcu.constraint_name = tc.constraint_name
                          WHERE tc.constraint_type = 'PRIMARY KEY'
                            AND kcu.table_name = c.table_name
                            AND kcu.column_name = c.column_name
                          LIMIT 1), false
                     ) AS primary_key,
                     COALESCE(col_description(
                         (SELECT oid FROM pg_class WHERE relname = c.table_name LIMIT 1),
                         c.ordinal_position
                     ), '') AS description
                 FROM information_schema.columns c
                 WHERE c.table_schema = 'public' AND c.table_name = $1
                 ORDER BY c.ordinal_position",
                &[&table],
            )
            .await
            .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;

        if rows.is_empty() {
            pool.checkin(conn).await;
            return Err(AdapterError::new(AdapterErrorKind::Introspection(format!(
                "table not found: {table}"
            )))
            .into());
        }

        let columns: Vec<ColumnInfo> = rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get(0),
                data_type: row.get(1),
                nullable: row.get(2),
                primary_key: row.get(3),
                description: row.get(4),
            })
            .collect();

        let row_count = conn
            .client
            .query_opt(
                "SELECT reltuples::bigint FROM pg_class WHERE relname = $1",
                &[&table],
            )
            .await
            .ok()
            .flatten()
            .map(|row| row.get::<_, i64>(0))
            .filter(|count| *count >= 0);
        pool.checkin(conn).await;

        Ok(TableInfo {
            name: table.to_string(),
            schema_name: "public".to_string(),
            columns,
            row_count,
        })
    }

    async fn schema_ddl(&self) -> SibylResult<String> {
        let pool = self.pool().await?;
        let conn = pool.checkout().await?;
        let rows = conn
            .client
            .query(
                "SELECT
                     c.table_name,
                     c.column_name,
                     c.data_type,
                     c.is_nullable,
                     COALESCE(
                         (SELECT 'PRIMARY KEY' FROM information_schema.key_column_usage kcu
                          JOIN information_schema.table_constraints tc
                            ON kcu.constraint_name = tc.constraint_name
                          WHERE tc.constraint_type = 'PRIMARY KEY'
                            AND kcu.table_name = c.table_name
                            AND kcu.column_name = c.column_name
                          LIMIT 1), ''
                     ) AS constraint_type
                 FROM information_schema.columns c
                 WHERE c.table_schema = 'public'
                 ORDER BY c.table_name, c.ordinal_position",
                &[],
            )
            .await
            .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;
        pool.checkin(conn).await;

        let mut ddl = String::new();
        let mut current_table = String::new();
        for row in &rows {
            let table: String = row.get(0);
            let column: String = row.get(1);
            let data_type: String = row.get(2);
            let is_nullable: String = row.get(3);
            let constraint: String = row.get(4);

            if table != current_table {
                if !current_table.is_empty() {
                    ddl.push_str("\n);\n\n");
                }
                ddl.push_str(&format!("CREATE TABLE {table} (\n"));
                current_table = table;
            } else {
                ddl.push_str(",\n");
            }

            let nullable = if is_nullable == "NO" { " NOT NULL" } else { "" };
            let pk = if constraint == "PRIMARY KEY" { " PRIMARY KEY" } else { "" };
            ddl.push_str(&format!("  {column} {data_type}{nullable}{pk}"));
        }
        if !current_table.is_empty() {
            ddl.push_str("\n);");
        }

        Ok(ddl)
    }

    fn validate_query(&self, sql: &str) -> SibylResult<()> {
        validate_sql(sql, Some(&POSTGRES_BLOCKED))
    }

    #[instrument(skip(self, sql), fields(max_rows = opts.max_rows))]
    async fn execute_query(&self, sql: &str, opts: ExecOptions) -> SibylResult<QueryResult> {
        self.validate_query(sql)?;
        // The +1 probe row is how truncation gets detected.
        let sql = enforce_limit(sql, opts.max_rows.saturating_add(1), "LIMIT");

        let pool = self.pool().await?;
        let conn = pool.checkout().await?;

        let result = tokio::time::timeout(opts.timeout, async {
            let statement = conn
                .client
                .prepare(&sql)
                .await
                .map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())))?;
            let columns: Vec<String> =
                statement.columns().iter().map(|c| c.name().to_string()).collect();

            let rows = conn
                .client
                .query(&statement, &[])
                .await
                .map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())))?;

            let max = opts.max_rows as usize;
            let mut out: Vec<Vec<JsonValue>> = Vec::with_capacity(rows.len().min(max));
            let mut truncated = false;
            for row in &rows {
                if out.len() >= max {
                    truncated = true;
                    break;
                }
                out.push((0..row.len()).map(|i| pg_cell_to_json(row, i)).collect());
            }

            Ok::<_, AdapterError>(QueryResult {
                columns,
                row_count: out.len(),
                rows: out,
                truncated,
            })
        })
        .await;

        pool.checkin(conn).await;

        match result {
            Ok(inner) => Ok(inner?),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::Timeout(
                opts.timeout.as_secs(),
            ))
            .into()),
        }
    }
}
