//! Transient query request and response types.

use crate::DatabaseKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Maximum accepted question length, in characters.
pub const MAX_QUESTION_CHARS: usize = 2_000;

/// Per-request overrides; each is clamped to the connection-level limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Row cap override, 1..=10000
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<u32>,
    /// Timeout override in seconds, 1..=300
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// A text-to-SQL query request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Target connection
    pub connection_id: Uuid,
    /// Plain-language question, at most [`MAX_QUESTION_CHARS`] characters
    pub question: String,
    /// Existing session to continue, or none to start a new one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Provider tag override; empty means the process default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    /// Model override; empty means the provider default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    /// Whether to execute the generated SQL
    #[serde(default)]
    pub execute: bool,
    /// Row-cap and timeout overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<QueryOptions>,
}

/// Bounded execution parameters handed to an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    /// Collect at most this many rows (plus one probe row for truncation)
    pub max_rows: u32,
    /// Wall-clock bound for the whole execution
    pub timeout: Duration,
}

/// Query execution data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in result order
    pub columns: Vec<String>,
    /// Row values as JSON cells
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Number of rows returned after truncation
    pub row_count: usize,
    /// Whether the adapter read more rows than the cap
    pub truncated: bool,
}

/// Metadata attached to every query response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    /// Connection the query ran against
    pub connection_id: Uuid,
    /// Back-end dialect
    pub database_kind: DatabaseKind,
    /// Provider that generated the SQL
    pub llm_provider: String,
    /// Model that generated the SQL
    pub llm_model: String,
    /// Whole-pipeline wall clock in milliseconds
    pub execution_time_ms: i64,
    /// LLM round-trip latency in milliseconds
    pub llm_latency_ms: i64,
    /// Tokens consumed by the LLM call
    pub tokens_used: u32,
}

/// The gateway's answer to a query request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Fresh id for this request
    pub request_id: Uuid,
    /// Session the exchange was recorded under
    pub session_id: Uuid,
    /// The question, echoed verbatim
    pub question: String,
    /// Generated SQL, no trailing semicolon; empty for conversational replies
    pub sql: String,
    /// Natural-language explanation or reply from the model
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub explanation: String,
    /// Execution result, when requested and successful
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryResult>,
    /// Validator or execution failure; the call itself still succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Request metadata
    pub metadata: QueryMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_request_defaults_from_minimal_json() {
        let req: QueryRequest = serde_json::from_str(
            r#"{"connection_id":"00000000-0000-0000-0000-000000000001","question":"count users"}"#,
        )
        .unwrap();
        assert!(!req.execute);
        assert!(req.session_id.is_none());
        assert!(req.options.is_none());
    }

    #[test]
    fn query_result_omits_empty_optionals() {
        let resp = QueryResponse {
            request_id: Uuid::nil(),
            session_id: Uuid::nil(),
            question: "q".into(),
            sql: "SELECT 1".into(),
            explanation: String::new(),
            result: None,
            error: None,
            metadata: QueryMetadata {
                connection_id: Uuid::nil(),
                database_kind: DatabaseKind::Postgres,
                llm_provider: "ollama".into(),
                llm_model: "llama3".into(),
                execution_time_ms: 1,
                llm_latency_ms: 1,
                tokens_used: 0,
            },
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"error\""));
        assert!(!json.contains("\"result\""));
        assert!(!json.contains("\"explanation\""));
    }
}
