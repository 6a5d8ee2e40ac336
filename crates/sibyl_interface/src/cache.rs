//! Schema snapshot cache contract.

use async_trait::async_trait;
use sibyl_core::SchemaSnapshot;
use sibyl_error::SibylResult;
use uuid::Uuid;

/// Key-value cache for schema snapshots, keyed by connection id.
///
/// Entries carry a short TTL; a miss (or an expired entry) returns `None`
/// and the pipeline re-introspects. Concurrent misses for the same
/// connection may introspect twice; the write is idempotent.
#[async_trait]
pub trait SchemaCache: Send + Sync {
    /// Fetch the cached snapshot, if present and fresh.
    async fn get(&self, connection_id: Uuid) -> SibylResult<Option<SchemaSnapshot>>;

    /// Store a snapshot under the connection id.
    async fn set(&self, connection_id: Uuid, snapshot: &SchemaSnapshot) -> SibylResult<()>;

    /// Drop the entry for one connection.
    async fn invalidate(&self, connection_id: Uuid) -> SibylResult<()>;

    /// Drop every entry. Returns how many were removed.
    async fn flush_all(&self) -> SibylResult<u64>;
}
