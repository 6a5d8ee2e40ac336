//! Gemini provider: REST `generateContent` with the vendor's chat role model.

use crate::prompt::{build_prompt, extract_sql};
use crate::{clean_title, title_prompt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sibyl_core::{Role, SqlGenRequest, SqlGenResponse};
use sibyl_error::{ProviderError, ProviderErrorKind, SibylResult};
use sibyl_interface::LlmProvider;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Gemini back-end.
///
/// History converts to the vendor's role model: "user" stays "user", the
/// assistant becomes "model".
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl GeminiProvider {
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

    async fn generate(
        &self,
        model: &str,
        contents: Vec<Content>,
        temperature: f32,
    ) -> SibylResult<GenerateContentResponse> {
        let url = format!("{BASE_URL}/models/{model}:generateContent");
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&GenerateContentRequest {
                contents,
                generation_config: GenerationConfig { temperature },
            })
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

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::new(ProviderErrorKind::Wire(e.to_string())))?;

        if parsed
            .candidates
            .first()
            .map(|c| c.content.parts.is_empty())
            .unwrap_or(true)
        {
            return Err(ProviderError::new(ProviderErrorKind::EmptyResponse).into());
        }
        Ok(parsed)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: u32,
}

fn text_content(role: &str, text: String) -> Content {
    Content {
        role: role.to_string(),
        parts: vec![Part { text }],
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn provider_tag(&self) -> &'static str {
        "gemini"
    }

    fn available_models(&self) -> Vec<String> {
        ["gemini-2.5-flash", "gemini-1.5-flash", "gemini-1.5-pro", "gemini-1.0-pro"]
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

        // History goes into the contents array in the vendor role model,
        // followed by the assembled prompt as the final user turn.
        let mut contents: Vec<Content> = request
            .history()
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                text_content(role, turn.content.clone())
            })
            .collect();
        contents.push(text_content("user", prompt));

        let start = Instant::now();
        let resp = self.generate(model, contents, 0.0).await?;
        let latency_ms = start.elapsed().as_millis() as i64;

        let output: String = resp.candidates[0]
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect();
        let sql = extract_sql(&output);
        let tokens_used = resp.usage_metadata.map(|u| u.total_token_count).unwrap_or(0);
        debug!(sql_len = sql.len(), tokens = tokens_used, "gemini responded");

        Ok(SqlGenResponse {
            sql,
            explanation: output,
            model: model.to_string(),
            tokens_used,
            latency_ms,
        })
    }

    #[instrument(skip(self, question))]
    async fn generate_title(&self, question: &str, model: &str) -> SibylResult<String> {
        let model = if model.is_empty() { self.default_model.as_str() } else { model };

        let resp = self
            .generate(model, vec![text_content("user", title_prompt(question))], 0.5)
            .await?;

        let title = clean_title(
            &resp.candidates[0]
                .content
                .parts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<String>(),
        );
        if title.is_empty() {
            return Err(ProviderError::new(ProviderErrorKind::EmptyResponse).into());
        }
        Ok(title)
    }
}
