//! OpenAI provider: HTTPS chat completions with a bearer key.

use crate::prompt::{build_prompt, extract_sql};
use crate::{clean_title, title_prompt, SQL_SYSTEM_PROMPT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sibyl_core::{SqlGenRequest, SqlGenResponse};
use sibyl_error::{ProviderError, ProviderErrorKind, SibylResult};
use sibyl_interface::LlmProvider;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI chat-completions back-end.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    api_key: String,
    default_model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Creates a provider with the given key and default model.
    pub fn new(api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, default_model, DEFAULT_BASE_URL)
    }

    /// Creates a provider against a custom OpenAI-compatible endpoint.
    pub fn with_base_url(
        api_key: impl Into<String>,
        default_model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let default_model = {
            let m = default_model.into();
            if m.is_empty() { DEFAULT_MODEL.to_string() } else { m }
        };
        Self {
            api_key: api_key.into(),
            default_model,
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }
}

/// Chat-completions request envelope, shared with OpenAI-compatible
/// back-ends.
#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// One chat-completions message.
#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

/// Chat-completions response envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoiceMessage {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChatUsage {
    #[serde(default)]
    pub total_tokens: u32,
}

/// POST a chat-completions request and unwrap the envelope.
///
/// Shared by the OpenAI and DeepSeek providers, which differ only in base
/// URL and model catalog.
pub(crate) async fn send_chat(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    request: &ChatRequest<'_>,
) -> SibylResult<ChatResponse> {
    let url = format!("{base_url}/chat/completions");
    let response = client
        .post(&url)
        .bearer_auth(api_key)
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

    let parsed: ChatResponse = response
        .json()
        .await
        .map_err(|e| ProviderError::new(ProviderErrorKind::Wire(e.to_string())))?;

    if parsed.choices.is_empty() {
        return Err(ProviderError::new(ProviderErrorKind::EmptyResponse).into());
    }
    Ok(parsed)
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_tag(&self) -> &'static str {
        "openai"
    }

    fn available_models(&self) -> Vec<String> {
        ["gpt-4-turbo", "gpt-4", "gpt-4o", "gpt-4o-mini", "gpt-3.5-turbo"]
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
        let resp = send_chat(
            &self.client,
            &self.base_url,
            &self.api_key,
            &ChatRequest {
                model,
                messages: vec![
                    ChatMessage { role: "system", content: SQL_SYSTEM_PROMPT },
                    ChatMessage { role: "user", content: &prompt },
                ],
                temperature: 0.0,
                max_tokens: Some(2048),
            },
        )
        .await?;
        let latency_ms = start.elapsed().as_millis() as i64;

        let content = &resp.choices[0].message.content;
        let sql = extract_sql(content);
        debug!(sql_len = sql.len(), tokens = resp.usage.total_tokens, "openai responded");

        Ok(SqlGenResponse {
            sql,
            explanation: content.clone(),
            model: model.to_string(),
            tokens_used: resp.usage.total_tokens,
            latency_ms,
        })
    }

    #[instrument(skip(self, question))]
    async fn generate_title(&self, question: &str, model: &str) -> SibylResult<String> {
        let model = if model.is_empty() { self.default_model.as_str() } else { model };
        let prompt = title_prompt(question);

        let resp = send_chat(
            &self.client,
            &self.base_url,
            &self.api_key,
            &ChatRequest {
                model,
                messages: vec![ChatMessage { role: "user", content: &prompt }],
                temperature: 0.5,
                max_tokens: Some(50),
            },
        )
        .await?;

        let title = clean_title(&resp.choices[0].message.content);
        if title.is_empty() {
            return Err(ProviderError::new(ProviderErrorKind::EmptyResponse).into());
        }
        Ok(title)
    }
}
