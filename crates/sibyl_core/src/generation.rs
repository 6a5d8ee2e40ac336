//! Request and response types for LLM SQL generation.

use crate::Role;
use serde::{Deserialize, Serialize};

/// One turn of the trailing conversation window.
///
/// The window is semantic context for the model, not structure the
/// gateway depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Who spoke
    pub role: Role,
    /// What was said
    pub content: String,
    /// SQL attached to an assistant turn, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

/// A question/SQL pair for few-shot prompting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptExample {
    /// The example question
    pub question: String,
    /// The SQL that answers it
    pub sql: String,
}

/// Everything a provider needs to generate SQL.
///
/// # Examples
///
/// ```
/// use sibyl_core::{DatabaseKind, SqlGenRequest};
///
/// let req = SqlGenRequest::builder()
///     .question("count users")
///     .schema_ddl("CREATE TABLE users (id int);")
///     .dialect_hints("PostgreSQL SQL dialect")
///     .database_kind(DatabaseKind::Postgres)
///     .build();
/// assert_eq!(req.question(), "count users");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_getters::Getters)]
pub struct SqlGenRequest {
    /// The user's question
    question: String,
    /// Schema DDL rendering, the model's only schema ground truth
    schema_ddl: String,
    /// Static dialect hints block from the adapter
    dialect_hints: String,
    /// Target back-end
    database_kind: crate::DatabaseKind,
    /// Trailing conversation window, oldest first
    history: Vec<ChatTurn>,
    /// Optional few-shot examples
    examples: Vec<PromptExample>,
}

impl SqlGenRequest {
    /// Creates a new builder.
    pub fn builder() -> SqlGenRequestBuilder {
        SqlGenRequestBuilder::default()
    }
}

/// Builder for [`SqlGenRequest`].
#[derive(Debug, Clone, Default)]
pub struct SqlGenRequestBuilder {
    question: String,
    schema_ddl: String,
    dialect_hints: String,
    database_kind: Option<crate::DatabaseKind>,
    history: Vec<ChatTurn>,
    examples: Vec<PromptExample>,
}

impl SqlGenRequestBuilder {
    /// Sets the question.
    pub fn question(mut self, question: impl Into<String>) -> Self {
        self.question = question.into();
        self
    }

    /// Sets the schema DDL.
    pub fn schema_ddl(mut self, ddl: impl Into<String>) -> Self {
        self.schema_ddl = ddl.into();
        self
    }

    /// Sets the dialect hints block.
    pub fn dialect_hints(mut self, hints: impl Into<String>) -> Self {
        self.dialect_hints = hints.into();
        self
    }

    /// Sets the target back-end.
    pub fn database_kind(mut self, kind: crate::DatabaseKind) -> Self {
        self.database_kind = Some(kind);
        self
    }

    /// Sets the conversation window.
    pub fn history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    /// Sets the few-shot examples.
    pub fn examples(mut self, examples: Vec<PromptExample>) -> Self {
        self.examples = examples;
        self
    }

    /// Builds the request. The back-end defaults to PostgreSQL when unset,
    /// which only matters in tests.
    pub fn build(self) -> SqlGenRequest {
        SqlGenRequest {
            question: self.question,
            schema_ddl: self.schema_ddl,
            dialect_hints: self.dialect_hints,
            database_kind: self.database_kind.unwrap_or(crate::DatabaseKind::Postgres),
            history: self.history,
            examples: self.examples,
        }
    }
}

/// A provider's answer.
///
/// `sql` is empty when the model declined to produce a query (a greeting,
/// say); `explanation` then carries the natural-language reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlGenResponse {
    /// Extracted SQL, no trailing semicolon
    pub sql: String,
    /// Natural-language reply or commentary
    pub explanation: String,
    /// Model that produced the answer
    pub model: String,
    /// Tokens consumed
    pub tokens_used: u32,
    /// Round-trip latency in milliseconds
    pub latency_ms: i64,
}
