//! Derived descriptions of a connection's structure.

use crate::DatabaseKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column metadata in declared order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Back-end data type as a string
    pub data_type: String,
    /// Whether NULL is accepted
    pub nullable: bool,
    /// Primary-key membership
    pub primary_key: bool,
    /// Optional column comment
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name
    pub name: String,
    /// Schema/namespace the table lives in, where the back-end has one
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schema_name: String,
    /// Columns in declared order
    pub columns: Vec<ColumnInfo>,
    /// Row-count estimate where the back-end offers one cheaply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
}

/// Cached result of introspecting a connection.
///
/// Produced on demand, cached keyed by connection id with a short TTL,
/// invalidated explicitly, and never persisted across restart. The `ddl`
/// rendering is the LLM's sole source of schema ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Back-end the snapshot describes
    pub kind: DatabaseKind,
    /// Tables in stable order
    pub tables: Vec<TableInfo>,
    /// Single dialect-valid DDL rendering for prompt embedding
    pub ddl: String,
    /// When the snapshot was taken
    pub cached_at: DateTime<Utc>,
}
