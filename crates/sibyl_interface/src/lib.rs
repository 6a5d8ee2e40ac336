//! Trait seams for the Sibyl gateway.
//!
//! The pipeline orchestrates exclusively through the traits defined here:
//! the database adapter contract, the LLM provider contract, the schema
//! cache, and the external collaborators (workspace authority, credential
//! store, user preferences, durable session/message stores).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod cache;
mod provider;
mod stores;

pub use adapter::{AdapterFactory, DatabaseAdapter};
pub use cache::SchemaCache;
pub use provider::{CredentialMap, LlmProvider, ProviderFactory, ProviderInfo};
pub use stores::{
    ConnectionStore, CredentialStore, MessageStore, SessionStore, UserPreferences,
    WorkspaceAuthority,
};
