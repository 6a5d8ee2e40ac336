//! Connection-keyed pool of live adapters.

use sibyl_core::{ConnectionConfig, DatabaseKind};
use sibyl_error::{AdapterError, AdapterErrorKind, SibylResult};
use sibyl_interface::{AdapterFactory, DatabaseAdapter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// Process-wide registry of live adapters keyed by connection id, plus
/// factories keyed by database kind.
///
/// At most one adapter per connection id is live; the id is the only key,
/// so reconfiguring a connection requires evicting it explicitly.
pub struct AdapterRouter {
    factories: std::sync::RwLock<HashMap<DatabaseKind, AdapterFactory>>,
    pool: RwLock<HashMap<uuid::Uuid, Arc<dyn DatabaseAdapter>>>,
}

impl AdapterRouter {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self {
            factories: std::sync::RwLock::new(HashMap::new()),
            pool: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a factory for a database kind. Idempotent; registration
    /// happens at startup.
    pub fn register_factory(&self, kind: DatabaseKind, factory: AdapterFactory) {
        self.factories
            .write()
            .expect("factory registry poisoned")
            .insert(kind, factory);
    }

    /// Database kinds with a registered factory.
    pub fn supported_kinds(&self) -> Vec<DatabaseKind> {
        let mut kinds: Vec<DatabaseKind> = self
            .factories
            .read()
            .expect("factory registry poisoned")
            .keys()
            .copied()
            .collect();
        kinds.sort();
        kinds
    }

    /// Number of live adapters.
    pub async fn pool_size(&self) -> usize {
        self.pool.read().await.len()
    }

    /// Return a healthy adapter for the connection, creating one when
    /// missing or unhealthy.
    ///
    /// The read-lock path health-checks an existing adapter without
    /// upgrading; a stale-but-healthy reading is acceptable. Creation
    /// takes the write lock with a double check, constructs through the
    /// factory, connects, and stores.
    #[instrument(skip(self, config), fields(connection = %connection_id, kind = %kind))]
    pub async fn get_adapter(
        &self,
        connection_id: uuid::Uuid,
        kind: DatabaseKind,
        config: &ConnectionConfig,
    ) -> SibylResult<Arc<dyn DatabaseAdapter>> {
        if let Some(adapter) = self.pool.read().await.get(&connection_id).cloned() {
            if adapter.health_check().await.is_ok() {
                return Ok(adapter);
            }
            warn!("pooled adapter failed health check, evicting");
            let mut pool = self.pool.write().await;
            if let Some(stale) = pool.remove(&connection_id)
                && let Err(e) = stale.close().await
            {
                warn!(error = %e, "failed to close evicted adapter");
            }
        }

        let mut pool = self.pool.write().await;

        // Another request may have created the adapter while we waited.
        if let Some(adapter) = pool.get(&connection_id).cloned() {
            if adapter.health_check().await.is_ok() {
                return Ok(adapter);
            }
            if let Some(stale) = pool.remove(&connection_id)
                && let Err(e) = stale.close().await
            {
                warn!(error = %e, "failed to close evicted adapter");
            }
        }

        let factory = self
            .factories
            .read()
            .expect("factory registry poisoned")
            .get(&kind)
            .cloned()
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::UnsupportedDatabase(kind.to_string()))
            })?;

        let adapter = factory();
        adapter.connect(config).await?;
        debug!("adapter connected and pooled");
        pool.insert(connection_id, adapter.clone());
        Ok(adapter)
    }

    /// Close and evict the adapter for one connection.
    pub async fn close_connection(&self, connection_id: uuid::Uuid) -> SibylResult<()> {
        let adapter = self.pool.write().await.remove(&connection_id);
        if let Some(adapter) = adapter {
            adapter.close().await?;
        }
        Ok(())
    }

    /// Close every pooled adapter.
    pub async fn close_all(&self) {
        let adapters: Vec<_> = self.pool.write().await.drain().collect();
        for (id, adapter) in adapters {
            if let Err(e) = adapter.close().await {
                warn!(connection = %id, error = %e, "failed to close adapter");
            }
        }
    }
}

impl Default for AdapterRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sibyl_core::{ExecOptions, QueryResult, SslMode, TableInfo};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default, Debug)]
    struct Probe {
        connects: AtomicUsize,
        closes: AtomicUsize,
        healthy: AtomicBool,
    }

    #[derive(Debug)]
    struct FakeAdapter {
        probe: Arc<Probe>,
    }

    #[async_trait]
    impl DatabaseAdapter for FakeAdapter {
        fn database_kind(&self) -> DatabaseKind {
            DatabaseKind::Sqlite
        }

        fn dialect_hints(&self) -> &'static str {
            "fake"
        }

        async fn connect(&self, _config: &ConnectionConfig) -> SibylResult<()> {
            self.probe.connects.fetch_add(1, Ordering::SeqCst);
            self.probe.healthy.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> SibylResult<()> {
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn health_check(&self) -> SibylResult<()> {
            if self.probe.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(AdapterError::new(AdapterErrorKind::NotConnected).into())
            }
        }

        async fn list_tables(&self) -> SibylResult<Vec<String>> {
            Ok(vec![])
        }

        async fn describe_table(&self, _table: &str) -> SibylResult<TableInfo> {
            Err(AdapterError::new(AdapterErrorKind::NotConnected).into())
        }

        async fn schema_ddl(&self) -> SibylResult<String> {
            Ok(String::new())
        }

        fn validate_query(&self, _sql: &str) -> SibylResult<()> {
            Ok(())
        }

        async fn execute_query(&self, _sql: &str, _opts: ExecOptions) -> SibylResult<QueryResult> {
            Err(AdapterError::new(AdapterErrorKind::NotConnected).into())
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("localhost", 5432, "db", "u", "p", SslMode::Disable, 100, 30)
    }

    fn router_with_probe() -> (AdapterRouter, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let router = AdapterRouter::new();
        let factory_probe = probe.clone();
        router.register_factory(
            DatabaseKind::Sqlite,
            Arc::new(move || {
                Arc::new(FakeAdapter { probe: factory_probe.clone() }) as Arc<dyn DatabaseAdapter>
            }),
        );
        (router, probe)
    }

    #[tokio::test]
    async fn reuses_healthy_adapter() {
        let (router, probe) = router_with_probe();
        let id = uuid::Uuid::new_v4();

        router.get_adapter(id, DatabaseKind::Sqlite, &config()).await.unwrap();
        router.get_adapter(id, DatabaseKind::Sqlite, &config()).await.unwrap();

        assert_eq!(probe.connects.load(Ordering::SeqCst), 1);
        assert_eq!(router.pool_size().await, 1);
    }

    #[tokio::test]
    async fn rebuilds_unhealthy_adapter() {
        let (router, probe) = router_with_probe();
        let id = uuid::Uuid::new_v4();

        router.get_adapter(id, DatabaseKind::Sqlite, &config()).await.unwrap();
        probe.healthy.store(false, Ordering::SeqCst);
        router.get_adapter(id, DatabaseKind::Sqlite, &config()).await.unwrap();

        assert_eq!(probe.connects.load(Ordering::SeqCst), 2);
        assert!(probe.closes.load(Ordering::SeqCst) >= 1);
        assert_eq!(router.pool_size().await, 1);
    }

    #[tokio::test]
    async fn unregistered_kind_is_refused() {
        let (router, _) = router_with_probe();
        let err = router
            .get_adapter(uuid::Uuid::new_v4(), DatabaseKind::Postgres, &config())
            .await
            .unwrap_err();
        assert!(format!("{err}").contains("unsupported database kind"));
    }

    #[tokio::test]
    async fn close_connection_evicts() {
        let (router, probe) = router_with_probe();
        let id = uuid::Uuid::new_v4();

        router.get_adapter(id, DatabaseKind::Sqlite, &config()).await.unwrap();
        router.close_connection(id).await.unwrap();

        assert_eq!(router.pool_size().await, 0);
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);

        // A second close of the same id is a no-op.
        router.close_connection(id).await.unwrap();
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_all_drains_the_pool() {
        let (router, _) = router_with_probe();
        for _ in 0..3 {
            router
                .get_adapter(uuid::Uuid::new_v4(), DatabaseKind::Sqlite, &config())
                .await
                .unwrap();
        }
        assert_eq!(router.pool_size().await, 3);
        router.close_all().await;
        assert_eq!(router.pool_size().await, 0);
    }
}
