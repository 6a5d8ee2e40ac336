//! Server configuration from environment variables.

use sibyl_error::ConfigError;

/// Everything the server reads from its environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address, e.g. "0.0.0.0:8080"
    pub listen_addr: String,
    /// Default LLM provider tag
    pub default_provider: String,
    /// Ollama host, e.g. "http://localhost:11434"
    pub ollama_host: String,
    /// Ollama default model
    pub ollama_model: String,
    /// OpenAI API key, empty when unconfigured
    pub openai_api_key: String,
    /// OpenAI default model
    pub openai_model: String,
    /// Anthropic API key, empty when unconfigured
    pub anthropic_api_key: String,
    /// Anthropic default model
    pub anthropic_model: String,
    /// DeepSeek API key, empty when unconfigured
    pub deepseek_api_key: String,
    /// DeepSeek default model
    pub deepseek_model: String,
    /// Gemini API key, empty when unconfigured
    pub gemini_api_key: String,
    /// Gemini default model
    pub gemini_model: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl ServerConfig {
    /// Load configuration from the environment.
    ///
    /// Reads `SIBYL_LISTEN_ADDR`, `SIBYL_LLM_DEFAULT`, and per-provider
    /// `SIBYL_<PROVIDER>_{API_KEY,MODEL}` variables (plus
    /// `SIBYL_OLLAMA_HOST`). Every value has a default except provider
    /// keys, which simply leave that provider unconfigured.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            listen_addr: env_or("SIBYL_LISTEN_ADDR", "0.0.0.0:8080"),
            default_provider: env_or("SIBYL_LLM_DEFAULT", "ollama"),
            ollama_host: env_or("SIBYL_OLLAMA_HOST", "http://localhost:11434"),
            ollama_model: env_or("SIBYL_OLLAMA_MODEL", ""),
            openai_api_key: env_or("SIBYL_OPENAI_API_KEY", ""),
            openai_model: env_or("SIBYL_OPENAI_MODEL", ""),
            anthropic_api_key: env_or("SIBYL_ANTHROPIC_API_KEY", ""),
            anthropic_model: env_or("SIBYL_ANTHROPIC_MODEL", ""),
            deepseek_api_key: env_or("SIBYL_DEEPSEEK_API_KEY", ""),
            deepseek_model: env_or("SIBYL_DEEPSEEK_MODEL", ""),
            gemini_api_key: env_or("SIBYL_GEMINI_API_KEY", ""),
            gemini_model: env_or("SIBYL_GEMINI_MODEL", ""),
        };

        const KNOWN_PROVIDERS: [&str; 5] =
            ["ollama", "openai", "anthropic", "deepseek", "gemini"];
        if !KNOWN_PROVIDERS.contains(&config.default_provider.as_str()) {
            return Err(ConfigError::new(format!(
                "SIBYL_LLM_DEFAULT names an unknown provider: {}",
                config.default_provider
            )));
        }

        Ok(config)
    }
}
