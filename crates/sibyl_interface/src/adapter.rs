//! The uniform database adapter contract.

use async_trait::async_trait;
use sibyl_core::{ConnectionConfig, DatabaseKind, ExecOptions, QueryResult, TableInfo};
use sibyl_error::SibylResult;
use std::sync::Arc;

/// Core contract every database back-end implements.
///
/// One adapter wraps one live connection (or pool) to one registered data
/// source. Adapters are created through [`AdapterFactory`] functions held
/// by the adapter router, never by the pipeline directly.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync + std::fmt::Debug {
    /// Stable back-end identifier, the factory key.
    fn database_kind(&self) -> DatabaseKind;

    /// Static prose block describing SQL quirks of this back-end, embedded
    /// verbatim in the generation prompt.
    fn dialect_hints(&self) -> &'static str;

    /// Establish the connection or pool and ping it. Fails fast on an
    /// unreachable or unauthorized target.
    async fn connect(&self, config: &ConnectionConfig) -> SibylResult<()>;

    /// Release all underlying resources. Idempotent.
    async fn close(&self) -> SibylResult<()>;

    /// Non-destructive liveness probe.
    async fn health_check(&self) -> SibylResult<()>;

    /// Names of user-visible base tables in a stable order, system and
    /// hidden tables excluded.
    async fn list_tables(&self) -> SibylResult<Vec<String>>;

    /// Column list in declared order with types, nullability, primary-key
    /// membership, and an optional row-count estimate.
    async fn describe_table(&self, table: &str) -> SibylResult<TableInfo>;

    /// Single textual rendering of the whole schema for prompt context.
    /// Deterministic for a fixed schema state.
    async fn schema_ddl(&self) -> SibylResult<String>;

    /// Apply the SQL safety rules with this back-end's pattern set.
    fn validate_query(&self, sql: &str) -> SibylResult<()>;

    /// Validate, bound, and execute. Collects up to `max_rows + 1` rows,
    /// truncates to `max_rows`, marks `truncated` when the probe row was
    /// read, normalizes byte blobs to strings, and observes the deadline.
    async fn execute_query(&self, sql: &str, opts: ExecOptions) -> SibylResult<QueryResult>;
}

/// Constructor registered with the adapter router, one per database kind.
pub type AdapterFactory = Arc<dyn Fn() -> Arc<dyn DatabaseAdapter> + Send + Sync>;
