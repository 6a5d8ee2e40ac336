//! Ollama provider: local inference over HTTP, non-streaming.

use crate::prompt::{build_prompt, extract_sql};
use crate::{clean_title, title_prompt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sibyl_core::{SqlGenRequest, SqlGenResponse};
use sibyl_error::{ProviderError, ProviderErrorKind, SibylResult};
use sibyl_interface::LlmProvider;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

const DEFAULT_MODEL: &str = "llama3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Local inference server back-end.
///
/// No credentials; a non-empty host is the whole configuration.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    host: String,
    default_model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Creates a provider talking to `host` (e.g. "http://localhost:11434").
    pub fn new(host: impl Into<String>, default_model: impl Into<String>) -> Self {
        let default_model = {
            let m = default_model.into();
            if m.is_empty() { DEFAULT_MODEL.to_string() } else { m }
        };
        Self {
            host: host.into(),
            default_model,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    async fn generate(&self, request: &OllamaRequest<'_>) -> SibylResult<OllamaResponse> {
        let url = format!("{}/api/generate", self.host);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::new(ProviderErrorKind::Timeout)
                } else {
                    ProviderError::new(ProviderErrorKind::Unavailable(e.to_string()))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(ProviderErrorKind::Unavailable(format!(
                "ollama returned status {status}: {body}"
            )))
            .into());
        }

        Ok(response
            .json::<OllamaResponse>()
            .await
            .map_err(|e| ProviderError::new(ProviderErrorKind::Wire(e.to_string())))?)
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    eval_count: u32,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn provider_tag(&self) -> &'static str {
        "ollama"
    }

    fn available_models(&self) -> Vec<String> {
        [
            "llama3",
            "llama3.1",
            "llama3.2",
            "codellama",
            "sqlcoder",
            "deepseek-coder",
            "mistral",
            "mixtral",
            "phi3",
            "qwen2",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.host.is_empty()
    }

    #[instrument(skip(self, request))]
    async fn generate_sql(
        &self,
        request: &SqlGenRequest,
        model: &str,
    ) -> SibylResult<SqlGenResponse> {
        let model = if model.is_empty() { self.default_model.as_str() } else { model };
        let prompt = build_prompt(request);
        debug!(prompt_len = prompt.len(), "dispatching SQL generation to ollama");

        let start = Instant::now();
        let resp = self
            .generate(&OllamaRequest {
                model,
                prompt: &prompt,
                stream: false,
                options: OllamaOptions {
                    temperature: 0.0,
                    num_predict: 4096,
                    num_ctx: Some(16_384),
                },
            })
            .await?;
        let latency_ms = start.elapsed().as_millis() as i64;

        let sql = extract_sql(&resp.response);
        debug!(sql_len = sql.len(), tokens = resp.eval_count, "ollama responded");

        Ok(SqlGenResponse {
            sql,
            explanation: resp.response,
            model: model.to_string(),
            tokens_used: resp.eval_count,
            latency_ms,
        })
    }

    #[instrument(skip(self, question))]
    async fn generate_title(&self, question: &str, model: &str) -> SibylResult<String> {
        let model = if model.is_empty() { self.default_model.as_str() } else { model };
        let prompt = title_prompt(question);

        let resp = self
            .generate(&OllamaRequest {
                model,
                prompt: &prompt,
                stream: false,
                options: OllamaOptions {
                    temperature: 0.5,
                    num_predict: 50,
                    num_ctx: None,
                },
            })
            .await?;

        let title = clean_title(&resp.response);
        if title.is_empty() {
            return Err(ProviderError::new(ProviderErrorKind::EmptyResponse).into());
        }
        Ok(title)
    }
}
