//! `toolrelay serve`: Start the HTTP gateway.

use toolrelay_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    if !config.has_api_key() {
        return Err(no_api_key().into());
    }

    println!("toolrelay gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.default_model);
    println!("   Users:     {}", config.gateway.tokens.len());

    toolrelay_gateway::start(config).await?;

    Ok(())
}

pub fn no_api_key() -> String {
    format!(
        "No API key configured. Set TOOLRELAY_API_KEY or ANTHROPIC_API_KEY, or add api_key to {}",
        AppConfig::config_dir().join("config.toml").display()
    )
}
