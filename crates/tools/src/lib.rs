//! Built-in tool catalog for toolrelay.
//!
//! The calculator is always available. When a remote endpoint is configured,
//! every tool it serves is registered next to it.

pub mod calculator;
pub mod remote;

use toolrelay_config::AppConfig;
use toolrelay_core::error::ToolError;
use toolrelay_core::tool::ToolRegistry;

pub use calculator::CalculatorTool;
pub use remote::{RemoteCatalog, RemoteTool};

/// Create a registry with the local built-in tools.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CalculatorTool));
    registry
}

/// Create the registry for a configuration: built-ins plus the remote
/// catalog, if one is configured.
///
/// A configured but unreachable catalog is an error.
pub async fn registry_from_config(config: &AppConfig) -> Result<ToolRegistry, ToolError> {
    let mut registry = default_registry();

    if let Some(endpoint) = &config.tools.remote_endpoint {
        let catalog = RemoteCatalog::new(endpoint.clone(), config.tools.remote_api_key.clone())?;
        for tool in catalog.into_tools().await? {
            registry.register(Box::new(tool));
        }
    }

    tracing::info!(tools = ?registry.names(), "Tool registry ready");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_calculator() {
        let registry = default_registry();
        assert_eq!(registry.names(), vec!["calculator"]);
    }

    #[tokio::test]
    async fn config_without_endpoint_uses_builtins() {
        let registry = registry_from_config(&AppConfig::default()).await.unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_catalog_is_an_error() {
        let mut config = AppConfig::default();
        config.tools.remote_endpoint = Some("http://127.0.0.1:1".into());
        assert!(registry_from_config(&config).await.is_err());
    }
}
