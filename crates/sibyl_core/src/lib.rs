//! Domain types for the Sibyl gateway.
//!
//! Everything in this crate is a plain data type: connections, chat
//! sessions and messages, query requests and responses, and schema
//! snapshots. Behavior lives behind the traits in `sibyl_interface`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod chat;
mod connection;
mod generation;
mod query;
mod schema;

pub use chat::{Message, Role, Session, DEFAULT_SESSION_TITLE};
pub use connection::{
    Connection, ConnectionConfig, DatabaseKind, SslMode, MAX_ROWS_RANGE, TIMEOUT_RANGE,
};
pub use generation::{ChatTurn, PromptExample, SqlGenRequest, SqlGenResponse};
pub use query::{
    ExecOptions, QueryMetadata, QueryOptions, QueryRequest, QueryResponse, QueryResult,
    MAX_QUESTION_CHARS,
};
pub use schema::{ColumnInfo, SchemaSnapshot, TableInfo};
