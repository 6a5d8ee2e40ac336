//! Anthropic provider: HTTPS messages API.

use crate::prompt::{build_prompt, extract_sql};
use crate::{clean_title, title_prompt, SQL_SYSTEM_PROMPT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sibyl_core::{SqlGenRequest, SqlGenResponse};
use sibyl_error::{ProviderError, ProviderErrorKind, SibylResult};
use sibyl_interface::LlmProvider;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

const BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Anthropic messages-API back-end.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Creates a provider with the given key and default model.
    pub fn new(api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
        let default_model = {
            let m = default_model.into();
            if m.is_empty() { DEFAULT_MODEL.to_string() } else { m }
        };
        Self {
            api_key: api_key.into(),
            default_model,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    async fn send(&self, request: &MessagesRequest<'_>) -> SibylResult<MessagesResponse> {
        let url = format!("{BASE_URL}/messages");
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::new(ProviderErrorKind::AuthFailed(format!(
                "status {status}"
            )))
            .into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(ProviderErrorKind::Unavailable(format!(
                "status {status}: {body}"
            )))
            .into());
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::new(ProviderErrorKind::Wire(e.to_string())))?;

        if parsed.content.is_empty() {
            return Err(ProviderError::new(ProviderErrorKind::EmptyResponse).into());
        }
        Ok(parsed)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<MessageBody<'a>>,
}

#[derive(Debug, Serialize)]
struct MessageBody<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_tag(&self) -> &'static str {
        "anthropic"
    }

    fn available_models(&self) -> Vec<String> {
        [
            "claude-3-opus-20240229",
            "claude-3-sonnet-20240229",
            "claude-3-haiku-20240307",
            "claude-3-5-sonnet-20241022",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    #[instrument(skip(self, request))]
    async fn generate_sql(
        &self,
        request: &SqlGenRequest,
        model: &str,
    ) -> SibylResult<SqlGenResponse> {
        let model = if model.is_empty() { self.default_model.as_str() } else { model };
        let prompt = build_prompt(request);

        let start = Instant::now();
        let resp = self
            .send(&MessagesRequest {
                model,
                max_tokens: 2048,
                system: Some(SQL_SYSTEM_PROMPT),
                messages: vec![MessageBody { role: "user", content: &prompt }],
            })
            .await?;
        let latency_ms = start.elapsed().as_millis() as i64;

        let content = &resp.content[0].text;
        let sql = extract_sql(content);
        let tokens_used = resp.usage.input_tokens + resp.usage.output_tokens;
        debug!(sql_len = sql.len(), tokens = tokens_used, "anthropic responded");

        Ok(SqlGenResponse {
            sql,
            explanation: content.clone(),
            model: model.to_string(),
            tokens_used,
            latency_ms,
        })
    }

    #[instrument(skip(self, question))]
    async fn generate_title(&self, question: &str, model: &str) -> SibylResult<String> {
        let model = if model.is_empty() { self.default_model.as_str() } else { model };
        let prompt = title_prompt(question);

        let resp = self
            .send(&MessagesRequest {
                model,
                max_tokens: 50,
                system: None,
                messages: vec![MessageBody { role: "user", content: &prompt }],
            })
            .await?;

        let title = clean_title(&resp.content[0].text);
        if title.is_empty() {
            return Err(ProviderError::new(ProviderErrorKind::EmptyResponse).into());
        }
        Ok(title)
    }
}
