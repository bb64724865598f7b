//! # toolrelay Protocol
//!
//! The wire side of a run:
//!
//! - [`codec`] frames `StreamEvent`s as `data: <json>\n\n` and decodes a
//!   chunked byte stream back into events
//! - [`transcript`] rebuilds the rendered transcript from decoded events
//! - [`client`] opens runs against a gateway over HTTP
//! - [`request`] holds the request bodies both sides agree on

pub mod client;
pub mod codec;
pub mod request;
pub mod transcript;

pub use client::{ClientError, EventStream, GatewayClient};
pub use codec::{DATA_PREFIX, DELIMITER, DONE_SENTINEL, FrameDecoder, decode_frame, encode_frame};
pub use request::{ChatStreamRequest, CreateChatRequest, HistoryEntry};
pub use transcript::{Block, Status, ToolBlock, TranscriptBuilder};
