//! Model backend implementations for toolrelay.
//!
//! All providers implement the `toolrelay_core::Provider` trait.

pub mod anthropic;

use std::sync::Arc;

use toolrelay_config::AppConfig;
use toolrelay_core::error::ProviderError;
use toolrelay_core::provider::Provider;

pub use anthropic::AnthropicProvider;

/// Build the configured model backend.
///
/// Fails with `NotConfigured` when no API key is available.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "no API key; set api_key in config.toml or TOOLRELAY_API_KEY / ANTHROPIC_API_KEY"
                .into(),
        )
    })?;

    let provider = AnthropicProvider::new(api_key)?
        .with_base_url(&config.provider.base_url)
        .with_prompt_caching(config.provider.prompt_caching);

    tracing::info!(
        provider = provider.name(),
        base_url = %config.provider.base_url,
        prompt_caching = config.provider.prompt_caching,
        "Model backend configured"
    );

    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_not_configured() {
        let config = AppConfig::default();
        let err = build_from_config(&config).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn builds_anthropic_with_key() {
        let config = AppConfig {
            api_key: Some("sk-ant-test".into()),
            ..AppConfig::default()
        };
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "anthropic");
    }
}
