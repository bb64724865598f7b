//! # toolrelay Core
//!
//! Domain types, traits, and error definitions for the toolrelay agent
//! runtime. Every subsystem is a trait here; implementations live in their
//! own crates:
//!
//! - `Provider`: language-model backends (`toolrelay-providers`)
//! - `Tool` / `ToolRegistry`: the tool catalog (`toolrelay-tools`)
//! - `CheckpointStore`: per-thread run snapshots (`toolrelay-agent`)
//! - `ChatStore`: conversation history (`toolrelay-gateway`)
//!
//! `StreamEvent` is the client-facing event union shared by the agent loop,
//! the wire codec, and the gateway.

pub mod checkpoint;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod store;
pub mod stream;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use error::{Error, ProtocolError, ProviderError, Result, RunError, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{CacheControl, Message, Role, ThreadId};
pub use provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage,
};
pub use store::{Chat, ChatStore};
pub use stream::StreamEvent;
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
