//! LLM providers and routing for the Sibyl gateway.
//!
//! Each back-end owns its wire format; prompt assembly and SQL extraction
//! are shared in [`prompt`]. The [`LlmRouter`] selects a provider per
//! request, honoring per-user credential overrides through registered
//! factories.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod anthropic;
mod deepseek;
mod gemini;
mod ollama;
mod openai;
pub mod prompt;
mod router;

pub use anthropic::AnthropicProvider;
pub use deepseek::DeepSeekProvider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use router::LlmRouter;

/// System instruction shared by the chat-completion style back-ends.
pub(crate) const SQL_SYSTEM_PROMPT: &str = "You are an expert SQL query generator. \
    Produce a single read-only query wrapped in a ```sql fenced block, or reply in \
    plain prose when the question is conversational rather than a data request.";

/// Prompt used by every back-end for session title generation.
pub(crate) fn title_prompt(question: &str) -> String {
    format!(
        "Summarize the following user question into a very short, concise title \
         (max 5 words). Do not use quotes or prefixes. Question: {question}"
    )
}

/// Strip surrounding whitespace, quotes, and newlines from a model title.
pub(crate) fn clean_title(raw: &str) -> String {
    raw.trim().trim_matches(['"', '\'']).trim().to_string()
}
