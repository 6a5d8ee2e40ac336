//! HTTP surface for the Sibyl gateway.
//!
//! A thin axum layer over [`sibyl_pipeline::QueryPipeline`]: route
//! handlers translate JSON bodies into pipeline calls and error kinds
//! into status codes. Authentication proper lives outside this crate;
//! the caller identity arrives in the `X-User-Id` header.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod respond;
mod routes;

pub use config::ServerConfig;
pub use respond::ApiError;
pub use routes::{create_router, AppState};

use sibyl_interface::{CredentialMap, LlmProvider};
use sibyl_llm::{
    AnthropicProvider, DeepSeekProvider, GeminiProvider, LlmRouter, OllamaProvider, OpenAiProvider,
};
use std::sync::Arc;

/// Build the LLM router from server configuration: one singleton per
/// back-end plus a credential factory for each, so per-user overrides can
/// mint request-scoped instances.
pub fn build_llm_router(config: &ServerConfig) -> LlmRouter {
    let router = LlmRouter::new(config.default_provider.clone());

    router.register_provider(Arc::new(OllamaProvider::new(
        config.ollama_host.clone(),
        config.ollama_model.clone(),
    )));
    router.register_provider(Arc::new(OpenAiProvider::new(
        config.openai_api_key.clone(),
        config.openai_model.clone(),
    )));
    router.register_provider(Arc::new(AnthropicProvider::new(
        config.anthropic_api_key.clone(),
        config.anthropic_model.clone(),
    )));
    router.register_provider(Arc::new(DeepSeekProvider::new(
        config.deepseek_api_key.clone(),
        config.deepseek_model.clone(),
    )));
    router.register_provider(Arc::new(GeminiProvider::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    )));

    router.register_factory(
        "ollama",
        Arc::new(|creds: &CredentialMap| {
            Arc::new(OllamaProvider::new(
                creds.get("host").cloned().unwrap_or_default(),
                creds.get("model").cloned().unwrap_or_default(),
            )) as Arc<dyn LlmProvider>
        }),
    );
    router.register_factory(
        "openai",
        Arc::new(|creds: &CredentialMap| {
            Arc::new(OpenAiProvider::new(
                creds.get("api_key").cloned().unwrap_or_default(),
                creds.get("model").cloned().unwrap_or_default(),
            )) as Arc<dyn LlmProvider>
        }),
    );
    router.register_factory(
        "anthropic",
        Arc::new(|creds: &CredentialMap| {
            Arc::new(AnthropicProvider::new(
                creds.get("api_key").cloned().unwrap_or_default(),
                creds.get("model").cloned().unwrap_or_default(),
            )) as Arc<dyn LlmProvider>
        }),
    );
    router.register_factory(
        "deepseek",
        Arc::new(|creds: &CredentialMap| {
            Arc::new(DeepSeekProvider::new(
                creds.get("api_key").cloned().unwrap_or_default(),
                creds.get("model").cloned().unwrap_or_default(),
            )) as Arc<dyn LlmProvider>
        }),
    );
    router.register_factory(
        "gemini",
        Arc::new(|creds: &CredentialMap| {
            Arc::new(GeminiProvider::new(
                creds.get("api_key").cloned().unwrap_or_default(),
                creds.get("model").cloned().unwrap_or_default(),
            )) as Arc<dyn LlmProvider>
        }),
    );

    router
}
