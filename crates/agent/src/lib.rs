//! The toolrelay agent: reasoning passes interleaved with tool calls.
//!
//! A run follows a small state machine:
//!
//! 1. **Agent**: prepare the bounded history and stream one model pass
//! 2. **Tools**: if the pass requested tools, resolve the whole batch
//! 3. Back to **Agent** with the tool results appended
//! 4. **Terminal** once a pass answers without tool calls
//!
//! Everything the loop does is reported on an internal channel; the
//! [`EventTranslator`] turns that into the client-facing [`StreamEvent`]
//! sequence.
//!
//! [`StreamEvent`]: toolrelay_core::StreamEvent

pub mod checkpoint;
pub mod history;
pub mod invoker;
pub mod loop_runner;
pub mod routing;
pub mod step;
pub mod token;
pub mod translator;

#[cfg(test)]
mod test_helpers;

pub use checkpoint::InMemoryCheckpointStore;
pub use history::{HistoryPreparer, TrimPolicy};
pub use invoker::ToolInvoker;
pub use loop_runner::Orchestrator;
pub use routing::{State, next_state};
pub use step::{AgentStep, ModelSettings, StepError, StepOutput};
pub use translator::{EventTranslator, LoopEvent};
