//! HTTP client for a toolrelay gateway.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use toolrelay_core::error::ProtocolError;
use toolrelay_core::store::Chat;
use toolrelay_core::stream::StreamEvent;
use tracing::debug;

use crate::codec::FrameDecoder;
use crate::request::{ChatStreamRequest, CreateChatRequest};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },
}

pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            status: status.as_u16(),
            body,
        })
    }

    pub async fn create_chat(&self, title: Option<String>) -> Result<Chat, ClientError> {
        let response = self
            .request(reqwest::Method::POST, "/api/chats")
            .json(&CreateChatRequest { title })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Open a run. Auth and ownership failures surface here, before any
    /// event is read.
    pub async fn stream_chat(
        &self,
        request: &ChatStreamRequest,
    ) -> Result<EventStream, ClientError> {
        let response = self
            .request(reqwest::Method::POST, "/api/chat/stream")
            .json(request)
            .send()
            .await?;
        let response = Self::check(response).await?;
        debug!(chat_id = %request.chat_id, "Stream opened");

        let bytes = response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()));
        Ok(EventStream::new(bytes))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

/// Decoded events of one open run.
pub struct EventStream {
    bytes: ByteStream,
    decoder: FrameDecoder,
    ready: VecDeque<Result<StreamEvent, ProtocolError>>,
    exhausted: bool,
}

impl EventStream {
    pub fn new(
        bytes: impl Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            bytes: Box::pin(bytes),
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            exhausted: false,
        }
    }

    /// The next decoded frame, or `None` once the transport is closed and
    /// drained. An undecodable frame is an `Err` item and reading continues.
    /// A transport failure mid-stream is reported as an `Error` event.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, ProtocolError>> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }
            if self.exhausted {
                return None;
            }
            match self.bytes.next().await {
                Some(Ok(chunk)) => self.ready.extend(self.decoder.push(&chunk)),
                Some(Err(e)) => {
                    self.exhausted = true;
                    let lost = StreamEvent::error(format!("connection lost: {e}"));
                    self.ready.push_back(Ok(lost));
                }
                None => {
                    self.exhausted = true;
                    self.ready.extend(self.decoder.finish());
                }
            }
        }
    }
}
