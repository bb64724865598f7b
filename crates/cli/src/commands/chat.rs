//! `toolrelay chat`: Talk to a running gateway.

use tokio::io::{AsyncBufReadExt, BufReader};
use toolrelay_protocol::client::GatewayClient;
use toolrelay_protocol::request::ChatStreamRequest;
use tracing::info;

use super::render::Renderer;

pub async fn run(
    url: String,
    token: Option<String>,
    chat_id: Option<String>,
    message: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = GatewayClient::new(url, token)?;

    let chat_id = match chat_id {
        Some(id) => id,
        None => {
            let chat = client.create_chat(None).await?;
            info!(chat_id = %chat.id, "Created chat");
            chat.id.to_string()
        }
    };

    if let Some(text) = message {
        return send(&client, &chat_id, text).await;
    }

    println!();
    println!("  toolrelay chat {chat_id}");
    println!("  Type your message and press Enter. Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        if let Err(e) = send(&client, &chat_id, line.to_string()).await {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    Ok(())
}

async fn send(
    client: &GatewayClient,
    chat_id: &str,
    text: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = ChatStreamRequest {
        messages: None,
        new_message: text,
        chat_id: chat_id.to_string(),
    };
    let mut events = client.stream_chat(&request).await?;
    let mut renderer = Renderer::new();
    while let Some(item) = events.next_event().await {
        renderer.apply(item);
    }
    renderer.finish()
}
