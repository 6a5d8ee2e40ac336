//! The uniform LLM provider contract.

use async_trait::async_trait;
use sibyl_core::{SqlGenRequest, SqlGenResponse};
use sibyl_error::SibylResult;
use std::collections::HashMap;
use std::sync::Arc;

/// Caller-supplied credential fields keyed by field name
/// (`api_key`, `host`, `base_url`, `model`).
pub type CredentialMap = HashMap<String, String>;

/// Core contract every LLM back-end implements.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable provider identifier (e.g. "ollama", "openai").
    fn provider_tag(&self) -> &'static str;

    /// Models this back-end advertises.
    fn available_models(&self) -> Vec<String>;

    /// Model used when the request names none.
    fn default_model(&self) -> String;

    /// Whether the instance carries usable credentials.
    fn is_configured(&self) -> bool;

    /// Generate SQL for a question given schema context and history.
    async fn generate_sql(
        &self,
        request: &SqlGenRequest,
        model: &str,
    ) -> SibylResult<SqlGenResponse>;

    /// Generate a short session title for a question.
    async fn generate_title(&self, question: &str, model: &str) -> SibylResult<String>;
}

/// Constructs a provider instance from caller-supplied credentials.
///
/// Registered with the LLM router next to the system-configured singleton
/// so per-user overrides can mint a fresh instance per request.
pub type ProviderFactory = Arc<dyn Fn(&CredentialMap) -> Arc<dyn LlmProvider> + Send + Sync>;

/// Listing entry describing one provider to the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProviderInfo {
    /// Provider tag
    pub name: String,
    /// Advertised models
    pub models: Vec<String>,
    /// Whether this is the process default
    pub default: bool,
    /// Whether the singleton carries credentials
    pub configured: bool,
}
