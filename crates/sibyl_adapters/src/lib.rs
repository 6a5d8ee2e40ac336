//! Database adapters for the Sibyl gateway.
//!
//! One adapter per back-end, all implementing the uniform
//! [`sibyl_interface::DatabaseAdapter`] contract: connect, introspect,
//! validate, execute with bounded rows and a deadline. The [`guard`]
//! module is the sole gate between LLM output and a database; the
//! [`AdapterRouter`] keys live adapters by connection id.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod clickhouse;
pub mod guard;
mod mongo;
mod mysql;
mod postgres;
mod router;
mod sqlite;

pub use clickhouse::ClickHouseAdapter;
pub use mongo::MongoAdapter;
pub use mysql::MySqlAdapter;
pub use postgres::PostgresAdapter;
pub use router::AdapterRouter;
pub use sqlite::SqliteAdapter;

use sibyl_core::DatabaseKind;
use sibyl_interface::DatabaseAdapter;
use std::sync::Arc;

/// Build a router with a factory registered for every supported back-end.
pub fn default_router() -> AdapterRouter {
    let router = AdapterRouter::new();
    router.register_factory(
        DatabaseKind::Postgres,
        Arc::new(|| Arc::new(PostgresAdapter::new()) as Arc<dyn DatabaseAdapter>),
    );
    router.register_factory(
        DatabaseKind::MySql,
        Arc::new(|| Arc::new(MySqlAdapter::new()) as Arc<dyn DatabaseAdapter>),
    );
    router.register_factory(
        DatabaseKind::ClickHouse,
        Arc::new(|| Arc::new(ClickHouseAdapter::new()) as Arc<dyn DatabaseAdapter>),
    );
    router.register_factory(
        DatabaseKind::Sqlite,
        Arc::new(|| Arc::new(SqliteAdapter::new()) as Arc<dyn DatabaseAdapter>),
    );
    router.register_factory(
        DatabaseKind::MongoDb,
        Arc::new(|| Arc::new(MongoAdapter::new()) as Arc<dyn DatabaseAdapter>),
    );
    router
}
