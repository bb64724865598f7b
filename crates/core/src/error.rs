//! Error types for the toolrelay domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `RunError` is the
//! run-level taxonomy surfaced to clients as a terminal `error` event.

use thiserror::Error;

/// The top-level error type for all toolrelay operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Wire protocol errors ---
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // --- Run lifecycle errors ---
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool backend unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    #[error("Unauthorized: {user_id} may not access chat {chat_id}")]
    Unauthorized { user_id: String, chat_id: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Malformed wire data seen while decoding a frame stream.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("Frame is missing the data prefix: {0}")]
    MissingPrefix(String),

    #[error("Frame body is not a valid event: {0}")]
    InvalidBody(String),

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("tool_end for unknown tool call: {0}")]
    UnknownToolCall(String),
}

/// Why a run ended without reaching `Done`.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Backend failure: {0}")]
    Backend(String),

    #[error("Run aborted: {0}")]
    Aborted(String),

    #[error("Exceeded the maximum of {max} reasoning iterations")]
    IterationLimit { max: u32 },

    #[error("Run timed out after {secs}s")]
    Timeout { secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 529,
            message: "Overloaded".into(),
        });
        assert!(err.to_string().contains("529"));
        assert!(err.to_string().contains("Overloaded"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::ExecutionFailed {
            tool_name: "calculator".into(),
            reason: "Division by zero".into(),
        });
        assert!(err.to_string().contains("calculator"));
        assert!(err.to_string().contains("Division by zero"));
    }

    #[test]
    fn run_error_converts_into_top_level() {
        let err: Error = RunError::IterationLimit { max: 3 }.into();
        assert!(matches!(err, Error::Run(RunError::IterationLimit { max: 3 })));
        assert!(err.to_string().contains("maximum of 3"));
    }
}
