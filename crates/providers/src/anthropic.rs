//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE with `content_block_delta` events
//! - Prompt caching: cache-marked messages and the system prompt carry
//!   `cache_control: {"type": "ephemeral"}` and requests send the
//!   `anthropic-beta: prompt-caching-2024-07-31` header

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use toolrelay_core::error::ProviderError;
use toolrelay_core::message::{CacheControl, Message, Role};
use toolrelay_core::provider::*;
use toolrelay_core::tool::ToolCall;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROMPT_CACHING_BETA: &str = "prompt-caching-2024-07-31";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    prompt_caching: bool,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with prompt caching enabled.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
            prompt_caching: true,
        })
    }

    /// Use a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_prompt_caching(mut self, enabled: bool) -> Self {
        self.prompt_caching = enabled;
        self
    }

    /// Split system messages out of the list.
    ///
    /// Anthropic puts the system prompt in a top-level field. The flag is set
    /// when any system message carries a cache marker.
    fn extract_system(messages: &[Message]) -> (Option<(String, bool)>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut cached = false;
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role() {
                Role::System => {
                    system_parts.push(&msg.content);
                    cached |= msg.is_cache_marked();
                }
                _ => non_system.push(msg),
            }
        }

        if system_parts.is_empty() {
            (None, non_system)
        } else {
            (Some((system_parts.join("\n\n"), cached)), non_system)
        }
    }

    /// Convert messages to Anthropic API format.
    ///
    /// Consecutive tool results are merged into one `user` turn, which is
    /// what the API expects after an assistant turn with several `tool_use`
    /// blocks.
    fn to_api_messages(messages: &[&Message], caching: bool) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            let cache_control =
                (caching && msg.is_cache_marked()).then_some(CacheControl::Ephemeral);

            match msg.role() {
                Role::User | Role::Assistant if msg.tool_calls.is_empty() => {
                    let content = match cache_control {
                        Some(cc) => AnthropicContent::Blocks(vec![ContentBlock::Text {
                            text: msg.content.clone(),
                            cache_control: Some(cc),
                        }]),
                        None => AnthropicContent::Text(msg.content.clone()),
                    };
                    result.push(AnthropicMessage {
                        role: msg.role().as_str().into(),
                        content,
                    });
                }
                Role::User | Role::Assistant => {
                    let mut blocks: Vec<ContentBlock> = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: msg.content.clone(),
                            cache_control: None,
                        });
                    }
                    for tc in &msg.tool_calls {
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input: tc.arguments.clone(),
                            cache_control: None,
                        });
                    }
                    if let Some(last) = blocks.last_mut() {
                        last.set_cache_control(cache_control);
                    }
                    result.push(AnthropicMessage {
                        role: "assistant".into(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
                Role::Tool => {
                    let block = ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                        cache_control,
                    };
                    let merge = matches!(
                        result.last(),
                        Some(AnthropicMessage {
                            role,
                            content: AnthropicContent::Blocks(blocks),
                        }) if role == "user"
                            && blocks.iter().all(|b| matches!(b, ContentBlock::ToolResult { .. }))
                    );
                    if !merge {
                        result.push(AnthropicMessage {
                            role: "user".into(),
                            content: AnthropicContent::Blocks(Vec::new()),
                        });
                    }
                    if let Some(AnthropicMessage {
                        content: AnthropicContent::Blocks(blocks),
                        ..
                    }) = result.last_mut()
                    {
                        blocks.push(block);
                    }
                }
                Role::System => {}
            }
        }

        result
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    /// Build the JSON request body shared by `complete` and `stream`.
    fn build_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);
        let api_messages = Self::to_api_messages(&messages, self.prompt_caching);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": api_messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }

        if let Some((text, cached)) = system {
            body["system"] = if self.prompt_caching && cached {
                serde_json::json!([{
                    "type": "text",
                    "text": text,
                    "cache_control": CacheControl::Ephemeral,
                }])
            } else {
                serde_json::json!(text)
            };
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    /// POST a request body and map error statuses.
    async fn send(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/messages", self.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if self.prompt_caching {
            builder = builder.header("anthropic-beta", PROMPT_CACHING_BETA);
        }
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed("Invalid Anthropic API key".into()));
        }
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }

    /// Convert an Anthropic API response to our ProviderResponse.
    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let mut text_content = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text_content.is_empty() {
                        text_content.push('\n');
                    }
                    text_content.push_str(&text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::new(id, name, input));
                }
            }
        }

        let mut message = Message::assistant_with_tools(text_content, tool_calls);
        message.id = resp.id;

        ProviderResponse {
            message,
            usage: Some(resp.usage.into()),
            model: resp.model,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let body = self.build_body(&request, false);
        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = self.send(&body, false).await?;
        let api_resp: AnthropicResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;

        Ok(Self::response_to_provider_response(api_resp))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let body = self.build_body(&request, true);
        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let response = self.send(&body, true).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut state = StreamState::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };

                // Lines are split on raw bytes so a multi-byte character
                // cut by a chunk boundary is reassembled before decoding.
                buffer.extend_from_slice(&bytes);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw);

                    match state.handle_line(line.trim_end()) {
                        Ok(Some(chunk)) => {
                            let done = chunk.done;
                            if tx.send(Ok(chunk)).await.is_err() || done {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            let _ = tx
                .send(Err(ProviderError::StreamInterrupted(
                    "stream ended before message_stop".into(),
                )))
                .await;
        });

        Ok(rx)
    }
}

/// A `tool_use` block whose input is still arriving.
struct PendingToolUse {
    id: String,
    name: String,
    input_json: String,
}

/// Accumulates Anthropic SSE events into `StreamChunk`s.
#[derive(Default)]
struct StreamState {
    current_tool: Option<PendingToolUse>,
    tool_calls: Vec<ToolCall>,
    usage: Usage,
}

impl StreamState {
    /// Handle one SSE line. Returns a chunk to forward, if any; a chunk with
    /// `done` set ends the stream.
    fn handle_line(&mut self, line: &str) -> Result<Option<StreamChunk>, ProviderError> {
        let Some(data) = line.strip_prefix("data:") else {
            // `event:` lines repeat the type carried in the data payload
            return Ok(None);
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(None);
        }

        let event: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                return Ok(None);
            }
        };

        self.handle_event(&event)
    }

    fn handle_event(
        &mut self,
        event: &serde_json::Value,
    ) -> Result<Option<StreamChunk>, ProviderError> {
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.usage.prompt_tokens = token_count(&usage["input_tokens"]);
                self.usage.cache_creation_tokens =
                    token_count(&usage["cache_creation_input_tokens"]);
                self.usage.cache_read_tokens = token_count(&usage["cache_read_input_tokens"]);
                Ok(None)
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.finish_tool()?;
                    self.current_tool = Some(PendingToolUse {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        input_json: String::new(),
                    });
                }
                Ok(None)
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => Ok(delta["text"].as_str().map(StreamChunk::text)),
                    "input_json_delta" => {
                        if let (Some(tool), Some(partial)) =
                            (self.current_tool.as_mut(), delta["partial_json"].as_str())
                        {
                            tool.input_json.push_str(partial);
                        }
                        Ok(None)
                    }
                    _ => Ok(None),
                }
            }
            "content_block_stop" => {
                self.finish_tool()?;
                Ok(None)
            }
            "message_delta" => {
                if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.completion_tokens = out as u32;
                }
                Ok(None)
            }
            "message_stop" => {
                self.finish_tool()?;
                let mut usage = std::mem::take(&mut self.usage);
                usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;

                let mut chunk = StreamChunk::finished(std::mem::take(&mut self.tool_calls));
                chunk.usage = Some(usage);
                Ok(Some(chunk))
            }
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown streaming error")
                    .to_string();
                Err(ProviderError::StreamInterrupted(message))
            }
            _ => Ok(None),
        }
    }

    fn finish_tool(&mut self) -> Result<(), ProviderError> {
        let Some(tool) = self.current_tool.take() else {
            return Ok(());
        };

        let arguments = if tool.input_json.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&tool.input_json).map_err(|e| {
                ProviderError::StreamInterrupted(format!(
                    "invalid input for tool {}: {e}",
                    tool.name
                ))
            })?
        };

        self.tool_calls.push(ToolCall::new(tool.id, tool.name, arguments));
        Ok(())
    }
}

fn token_count(value: &serde_json::Value) -> u32 {
    value.as_u64().unwrap_or(0) as u32
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
}

impl ContentBlock {
    fn set_cache_control(&mut self, value: Option<CacheControl>) {
        match self {
            Self::Text { cache_control, .. }
            | Self::ToolUse { cache_control, .. }
            | Self::ToolResult { cache_control, .. } => *cache_control = value,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
}

impl From<AnthropicUsage> for Usage {
    fn from(u: AnthropicUsage) -> Self {
        Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
            cache_creation_tokens: u.cache_creation_input_tokens,
            cache_read_tokens: u.cache_read_input_tokens,
        }
    }
}
