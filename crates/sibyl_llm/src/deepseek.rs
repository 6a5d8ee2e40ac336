//! DeepSeek provider: OpenAI-compatible chat completions on its own host.

use crate::openai::{send_chat, ChatMessage, ChatRequest};
use crate::prompt::{build_prompt, extract_sql};
use crate::{clean_title, title_prompt, SQL_SYSTEM_PROMPT};
use async_trait::async_trait;
use sibyl_core::{SqlGenRequest, SqlGenResponse};
use sibyl_error::{ProviderError, ProviderErrorKind, SibylResult};
use sibyl_interface::LlmProvider;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

const BASE_URL: &str = "https://api.deepseek.com/v1";
const DEFAULT_MODEL: &str = "deepseek-chat";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// DeepSeek back-end.
#[derive(Debug, Clone)]
pub struct DeepSeekProvider {
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl DeepSeekProvider {
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
}

#[async_trait]
impl LlmProvider for DeepSeekProvider {
    fn provider_tag(&self) -> &'static str {
        "deepseek"
    }

    fn available_models(&self) -> Vec<String> {
        ["deepseek-chat", "deepseek-coder"]
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
            BASE_URL,
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
        debug!(sql_len = sql.len(), tokens = resp.usage.total_tokens, "deepseek responded");

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
            BASE_URL,
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
