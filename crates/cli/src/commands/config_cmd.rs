//! `toolrelay config`: Configuration helpers.

use clap::Subcommand;
use toolrelay_config::AppConfig;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the default configuration as TOML
    Default,
    /// Print the config file path
    Path,
    /// Load and validate the current configuration
    Validate,
}

pub fn run(action: Option<ConfigAction>) -> Result<(), Box<dyn std::error::Error>> {
    match action.unwrap_or(ConfigAction::Default) {
        ConfigAction::Default => print!("{}", AppConfig::default_toml()),
        ConfigAction::Path => println!("{}", config_path().display()),
        ConfigAction::Validate => validate()?,
    }
    Ok(())
}

fn config_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}

fn validate() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    println!("Config OK ({})", config_path().display());

    if !config.has_api_key() {
        println!("   warning: no API key set (TOOLRELAY_API_KEY or ANTHROPIC_API_KEY)");
    }
    if config.gateway.tokens.is_empty() {
        println!("   warning: no gateway tokens; every request runs as the local user");
    }

    println!("   Model:       {}", config.default_model);
    println!("   Iterations:  {}", config.agent.max_iterations);
    println!("   Timeout:     {}s", config.agent.run_timeout_secs);
    println!("   Gateway:     {}:{}", config.gateway.host, config.gateway.port);
    match &config.tools.remote_endpoint {
        Some(endpoint) => println!("   Tools:       calculator + {endpoint}"),
        None => println!("   Tools:       calculator"),
    }
    Ok(())
}
