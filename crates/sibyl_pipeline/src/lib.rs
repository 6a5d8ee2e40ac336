//! Query orchestration for the Sibyl gateway.
//!
//! [`QueryPipeline`] is the only stateful orchestrator in the workspace:
//! it admits a request, resolves the session and connection, assembles
//! schema and history context, dispatches SQL generation, enforces the
//! safety gate, executes within bounds, and persists both sides of the
//! exchange. Everything it touches sits behind a `sibyl_interface` trait.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod memory;
mod pipeline;

pub use cache::InMemorySchemaCache;
pub use memory::{
    InMemoryConnectionStore, InMemoryMessageStore, InMemorySessionStore, InMemoryUserPreferences,
    InMemoryWorkspaceAuthority, PlainCredentialStore,
};
pub use pipeline::{PipelineStores, QueryPipeline};
