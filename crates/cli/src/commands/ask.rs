//! `toolrelay ask`: One in-process run, rendered through the wire path.
//!
//! Events are framed and decoded exactly as a remote client would see
//! them, so the output matches `toolrelay chat`.

use std::sync::Arc;

use toolrelay_agent::Orchestrator;
use toolrelay_config::AppConfig;
use toolrelay_core::message::{Message, ThreadId};
use toolrelay_protocol::codec::{FrameDecoder, encode_frame};

use super::render::Renderer;
use super::serve::no_api_key;

pub async fn run(message: String) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if !config.has_api_key() {
        return Err(no_api_key().into());
    }

    let provider = toolrelay_providers::build_from_config(&config)?;
    let tools = Arc::new(toolrelay_tools::registry_from_config(&config).await?);
    let orchestrator = Orchestrator::from_config(&config, provider, tools);

    let mut events = orchestrator.run(ThreadId::new(), Vec::new(), Message::user(message));
    let mut decoder = FrameDecoder::new();
    let mut renderer = Renderer::new();

    while let Some(event) = events.recv().await {
        for item in decoder.push(encode_frame(&event).as_bytes()) {
            renderer.apply(item);
        }
    }
    for item in decoder.finish() {
        renderer.apply(item);
    }

    renderer.finish()
}
