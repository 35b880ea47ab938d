//! Text-generation provider implementations for turnledger.
//!
//! All providers implement the `turnledger_core::Provider` trait.
//! [`build_from_config`] picks the configured one.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use std::sync::Arc;
use turnledger_config::AppConfig;
use turnledger_core::provider::Provider;

/// Build the default provider from configuration.
///
/// Per-provider settings under `[providers.<name>]` take precedence over the
/// top-level API key and the well-known base URL.
pub fn build_from_config(config: &AppConfig) -> Arc<dyn Provider> {
    let name = config.default_provider.as_str();
    let provider_config = config.providers.get(name);

    let api_key = provider_config
        .and_then(|p| p.api_key.clone())
        .or_else(|| config.api_key.clone())
        .unwrap_or_default();

    let base_url = provider_config
        .and_then(|p| p.api_url.clone())
        .unwrap_or_else(|| default_base_url(name));

    tracing::debug!(provider = name, base_url = %base_url, "Building provider");
    Arc::new(OpenAiCompatProvider::new(name, base_url, api_key))
}

/// The model to request: the provider's own default if configured,
/// otherwise the global default.
pub fn resolve_model(config: &AppConfig) -> String {
    config
        .providers
        .get(&config.default_provider)
        .and_then(|p| p.default_model.clone())
        .unwrap_or_else(|| config.default_model.clone())
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "groq" => "https://api.groq.com/openai/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnledger_config::ProviderConfig;

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("groq").contains("api.groq.com"));
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn build_from_default_config() {
        let config = AppConfig::default();
        let provider = build_from_config(&config);
        assert_eq!(provider.name(), "groq");
        assert_eq!(resolve_model(&config), "llama-3.1-8b-instant");
    }

    #[test]
    fn provider_section_overrides_defaults() {
        let mut config = AppConfig {
            default_provider: "vllm".into(),
            ..AppConfig::default()
        };
        config.providers.insert(
            "vllm".into(),
            ProviderConfig {
                api_key: None,
                api_url: Some("http://gpu-box:9000/v1".into()),
                default_model: Some("qwen2.5-7b".into()),
            },
        );

        let provider = build_from_config(&config);
        assert_eq!(provider.name(), "vllm");
        assert_eq!(resolve_model(&config), "qwen2.5-7b");
    }
}
