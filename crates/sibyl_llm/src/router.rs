//! Provider selection with per-user credential overrides.

use sibyl_error::{ProviderError, ProviderErrorKind, SibylResult};
use sibyl_interface::{CredentialMap, LlmProvider, ProviderFactory, ProviderInfo};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use tracing::{debug, instrument};

/// Registry of LLM providers.
///
/// Holds two maps keyed by provider tag: system-configured singleton
/// instances, and factories that mint a fresh instance from caller
/// credentials. Registration happens at startup; lookups take the read
/// lock only.
pub struct LlmRouter {
    providers: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
    factories: RwLock<HashMap<String, ProviderFactory>>,
    default_provider: String,
}

impl LlmRouter {
    /// Creates an empty router with the given default provider tag.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
            default_provider: default_provider.into(),
        }
    }

    /// Registers a system-configured singleton. Idempotent per tag; the
    /// latest registration wins.
    pub fn register_provider(&self, provider: Arc<dyn LlmProvider>) {
        let tag = provider.provider_tag().to_string();
        debug!(provider = %tag, configured = provider.is_configured(), "registering LLM provider");
        self.providers
            .write()
            .expect("provider registry poisoned")
            .insert(tag, provider);
    }

    /// Registers a factory that builds an instance from caller credentials.
    pub fn register_factory(&self, tag: impl Into<String>, factory: ProviderFactory) {
        self.factories
            .write()
            .expect("factory registry poisoned")
            .insert(tag.into(), factory);
    }

    /// The process-default provider tag.
    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Resolve a provider for a request.
    ///
    /// An empty tag means the process default. When `overrides` is
    /// non-empty and a factory exists for the tag, a fresh instance is
    /// built from the overridden credentials; otherwise the singleton is
    /// returned, failing when it is absent or unconfigured.
    #[instrument(skip(self, overrides))]
    pub fn get(
        &self,
        tag: &str,
        overrides: Option<&CredentialMap>,
    ) -> SibylResult<Arc<dyn LlmProvider>> {
        let tag = if tag.is_empty() { self.default_provider.as_str() } else { tag };

        if let Some(config) = overrides.filter(|c| !c.is_empty()) {
            let factories = self.factories.read().expect("factory registry poisoned");
            if let Some(factory) = factories.get(tag) {
                debug!(provider = tag, "building provider from per-user credentials");
                return Ok(factory(config));
            }
        }

        let providers = self.providers.read().expect("provider registry poisoned");
        let provider = providers
            .get(tag)
            .cloned()
            .ok_or_else(|| ProviderError::new(ProviderErrorKind::UnknownProvider(tag.into())))?;

        if !provider.is_configured() {
            return Err(ProviderError::new(ProviderErrorKind::NotConfigured(tag.into())).into());
        }
        Ok(provider)
    }

    /// Tags of singletons that report usable credentials.
    pub fn list_configured(&self) -> Vec<String> {
        let providers = self.providers.read().expect("provider registry poisoned");
        let mut tags: Vec<String> = providers
            .iter()
            .filter(|(_, p)| p.is_configured())
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        tags
    }

    /// Listing of every registered singleton for the HTTP surface.
    pub fn provider_info(&self) -> Vec<ProviderInfo> {
        let providers = self.providers.read().expect("provider registry poisoned");
        let mut infos: Vec<ProviderInfo> = providers
            .iter()
            .map(|(tag, p)| ProviderInfo {
                name: tag.clone(),
                models: p.available_models(),
                default: *tag == self.default_provider,
                configured: p.is_configured(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sibyl_core::{SqlGenRequest, SqlGenResponse};

    #[derive(Debug)]
    struct FakeProvider {
        tag: &'static str,
        configured: bool,
        marker: String,
    }

    #[async_trait]
    impl LlmProvider for FakeProvider {
        fn provider_tag(&self) -> &'static str {
            self.tag
        }

        fn available_models(&self) -> Vec<String> {
            vec!["fake-1".into()]
        }

        fn default_model(&self) -> String {
            "fake-1".into()
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn generate_sql(
            &self,
            _request: &SqlGenRequest,
            model: &str,
        ) -> SibylResult<SqlGenResponse> {
            Ok(SqlGenResponse {
                sql: format!("SELECT '{}'", self.marker),
                explanation: String::new(),
                model: model.to_string(),
                tokens_used: 0,
                latency_ms: 0,
            })
        }

        async fn generate_title(&self, _question: &str, _model: &str) -> SibylResult<String> {
            Ok("title".into())
        }
    }

    fn router() -> LlmRouter {
        let router = LlmRouter::new("ollama");
        router.register_provider(Arc::new(FakeProvider {
            tag: "ollama",
            configured: true,
            marker: "system".into(),
        }));
        router.register_provider(Arc::new(FakeProvider {
            tag: "openai",
            configured: false,
            marker: "system".into(),
        }));
        router.register_factory(
            "openai",
            Arc::new(|creds: &CredentialMap| {
                Arc::new(FakeProvider {
                    tag: "openai",
                    configured: true,
                    marker: creds.get("api_key").cloned().unwrap_or_default(),
                }) as Arc<dyn LlmProvider>
            }),
        );
        router
    }

    #[test]
    fn empty_tag_falls_back_to_default() {
        let router = router();
        let provider = router.get("", None).unwrap();
        assert_eq!(provider.provider_tag(), "ollama");
    }

    #[test]
    fn unconfigured_singleton_is_refused() {
        let router = router();
        let err = router.get("openai", None).unwrap_err();
        assert!(format!("{err}").contains("not configured"));
    }

    #[test]
    fn overrides_mint_a_fresh_instance() {
        let router = router();
        let mut creds = CredentialMap::new();
        creds.insert("api_key".into(), "sk-user-b".into());
        let provider = router.get("openai", Some(&creds)).unwrap();
        assert!(provider.is_configured());
    }

    #[test]
    fn empty_overrides_use_the_singleton() {
        let router = router();
        let creds = CredentialMap::new();
        let err = router.get("openai", Some(&creds)).unwrap_err();
        assert!(format!("{err}").contains("not configured"));
    }

    #[test]
    fn unknown_tag_is_not_found() {
        let router = router();
        let err = router.get("mistral", None).unwrap_err();
        assert!(format!("{err}").contains("not found"));
    }

    #[test]
    fn list_configured_filters_unconfigured() {
        let router = router();
        assert_eq!(router.list_configured(), vec!["ollama".to_string()]);
    }

    #[test]
    fn provider_info_marks_default() {
        let router = router();
        let infos = router.provider_info();
        let ollama = infos.iter().find(|i| i.name == "ollama").unwrap();
        assert!(ollama.default && ollama.configured);
        let openai = infos.iter().find(|i| i.name == "openai").unwrap();
        assert!(!openai.default && !openai.configured);
    }
}
