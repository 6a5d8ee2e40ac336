//! In-process TTL cache for schema snapshots.

use async_trait::async_trait;
use sibyl_core::SchemaSnapshot;
use sibyl_error::SibylResult;
use sibyl_interface::SchemaCache;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Default snapshot lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    snapshot: SchemaSnapshot,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() > ttl
    }
}

/// Schema cache held in process memory.
///
/// Entries expire after the TTL and are dropped lazily on read. Nothing
/// survives a restart, matching the snapshot lifetime contract.
pub struct InMemorySchemaCache {
    entries: RwLock<HashMap<Uuid, CacheEntry>>,
    ttl: Duration,
}

impl InMemorySchemaCache {
    /// Creates a cache with the default five-minute TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Creates a cache with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Number of live (possibly expired, not yet reaped) entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemorySchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaCache for InMemorySchemaCache {
    async fn get(&self, connection_id: Uuid) -> SibylResult<Option<SchemaSnapshot>> {
        {
            let entries = self.entries.read().await;
            match entries.get(&connection_id) {
                Some(entry) if !entry.is_expired(self.ttl) => {
                    debug!(connection = %connection_id, "schema cache hit");
                    return Ok(Some(entry.snapshot.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: reap under the write lock.
        self.entries.write().await.remove(&connection_id);
        debug!(connection = %connection_id, "schema cache entry expired");
        Ok(None)
    }

    async fn set(&self, connection_id: Uuid, snapshot: &SchemaSnapshot) -> SibylResult<()> {
        self.entries.write().await.insert(
            connection_id,
            CacheEntry {
                snapshot: snapshot.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn invalidate(&self, connection_id: Uuid) -> SibylResult<()> {
        self.entries.write().await.remove(&connection_id);
        Ok(())
    }

    async fn flush_all(&self) -> SibylResult<u64> {
        let mut entries = self.entries.write().await;
        let count = entries.len() as u64;
        entries.clear();
        debug!(flushed = count, "schema cache flushed");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sibyl_core::DatabaseKind;

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot {
            kind: DatabaseKind::Postgres,
            tables: vec![],
            ddl: "CREATE TABLE t (id int);".into(),
            cached_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_returns_stored_snapshot() {
        let cache = InMemorySchemaCache::new();
        let id = Uuid::new_v4();
        assert!(cache.get(id).await.unwrap().is_none());

        cache.set(id, &snapshot()).await.unwrap();
        let cached = cache.get(id).await.unwrap().unwrap();
        assert_eq!(cached.ddl, "CREATE TABLE t (id int);");
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = InMemorySchemaCache::with_ttl(Duration::from_millis(10));
        let id = Uuid::new_v4();
        cache.set(id, &snapshot()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.get(id).await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn invalidate_drops_one_entry() {
        let cache = InMemorySchemaCache::new();
        let keep = Uuid::new_v4();
        let drop = Uuid::new_v4();
        cache.set(keep, &snapshot()).await.unwrap();
        cache.set(drop, &snapshot()).await.unwrap();

        cache.invalidate(drop).await.unwrap();
        assert!(cache.get(drop).await.unwrap().is_none());
        assert!(cache.get(keep).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn flush_all_reports_count() {
        let cache = InMemorySchemaCache::new();
        for _ in 0..4 {
            cache.set(Uuid::new_v4(), &snapshot()).await.unwrap();
        }
        assert_eq!(cache.flush_all().await.unwrap(), 4);
        assert!(cache.is_empty().await);
    }
}
