//! Tool Invoker: executes a pass's tool calls against the catalog.
//!
//! Each call runs as its own spawned task. Results come back in completion
//! order (each reported as it resolves) and are attached to the history in
//! the order the model requested them. A failing call becomes an error
//! string in its tool message; it never fails the run.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use toolrelay_core::event::{DomainEvent, EventBus};
use toolrelay_core::message::{Message, ThreadId};
use toolrelay_core::tool::{ToolCall, ToolRegistry, ToolResult};
use tracing::{debug, warn};

use crate::translator::LoopEvent;

/// Placeholder content for a tool that returned nothing, so the tool
/// message is never empty.
pub const EMPTY_RESULT: &str = "(empty result)";

#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    parallel: bool,
    event_bus: Arc<EventBus>,
}

/// Outcome of one resolved call.
struct Resolved {
    index: usize,
    output: serde_json::Value,
    success: bool,
    duration_ms: u64,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            parallel: true,
            event_bus,
        }
    }

    /// Run calls one after another instead of concurrently.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute every call and return one tool message per call, ordered
    /// like `calls`.
    ///
    /// In parallel mode `ToolDispatched` is reported for all calls before any
    /// work starts; in sequential mode each call is reported just before it
    /// runs. `ToolResolved` follows as each one finishes. Send failures on
    /// `events` are ignored here: the loop notices the closed channel after
    /// the pass.
    pub async fn invoke(
        &self,
        thread_id: &ThreadId,
        calls: &[ToolCall],
        events: &mpsc::Sender<LoopEvent>,
    ) -> Vec<Message> {
        let mut outputs: Vec<Option<serde_json::Value>> = vec![None; calls.len()];

        if self.parallel {
            for call in calls {
                dispatch(call, events).await;
            }
            let mut pending: FuturesUnordered<_> = calls
                .iter()
                .enumerate()
                .map(|(index, call)| self.spawn_call(index, call.clone()))
                .collect();

            while let Some(resolved) = pending.next().await {
                self.record(thread_id, &calls[resolved.index], &resolved, events).await;
                outputs[resolved.index] = Some(resolved.output);
            }
        } else {
            for (index, call) in calls.iter().enumerate() {
                dispatch(call, events).await;
                let resolved = self.spawn_call(index, call.clone()).await;
                self.record(thread_id, call, &resolved, events).await;
                outputs[index] = Some(resolved.output);
            }
        }

        calls
            .iter()
            .zip(outputs)
            .map(|(call, output)| {
                let result = ToolResult {
                    call_id: call.id.clone(),
                    output: output.unwrap_or(serde_json::Value::Null),
                };
                Message::tool_result(call.id.clone(), message_content(&result))
            })
            .collect()
    }

    /// Run one call on its own task. A panicking tool resolves as a failure.
    async fn spawn_call(&self, index: usize, call: ToolCall) -> Resolved {
        let registry = Arc::clone(&self.registry);
        let name = call.name.clone();
        let started = Instant::now();

        let joined = tokio::spawn(async move { registry.execute(&call).await }).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (output, success) = match joined {
            Ok(Ok(result)) => (result.output, true),
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "Tool call failed");
                (serde_json::Value::String(format!("Error: {e}")), false)
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool task aborted");
                (
                    serde_json::Value::String(format!("Error: tool '{name}' did not complete")),
                    false,
                )
            }
        };

        Resolved {
            index,
            output,
            success,
            duration_ms,
        }
    }

    async fn record(
        &self,
        thread_id: &ThreadId,
        call: &ToolCall,
        resolved: &Resolved,
        events: &mpsc::Sender<LoopEvent>,
    ) {
        debug!(
            tool = %call.name,
            id = %call.id,
            success = resolved.success,
            duration_ms = resolved.duration_ms,
            "Tool call resolved"
        );

        self.event_bus.publish(DomainEvent::ToolExecuted {
            thread_id: thread_id.to_string(),
            tool_name: call.name.clone(),
            success: resolved.success,
            duration_ms: resolved.duration_ms,
            timestamp: Utc::now(),
        });

        let _ = events
            .send(LoopEvent::ToolResolved {
                id: call.id.clone(),
                name: call.name.clone(),
                output: resolved.output.clone(),
            })
            .await;
    }
}

async fn dispatch(call: &ToolCall, events: &mpsc::Sender<LoopEvent>) {
    let _ = events
        .send(LoopEvent::ToolDispatched {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        })
        .await;
}

fn message_content(result: &ToolResult) -> String {
    let text = match &result.output {
        serde_json::Value::Null => String::new(),
        _ => result.output_text(),
    };
    if text.trim().is_empty() {
        EMPTY_RESULT.to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{EchoTool, FailingTool, SlowTool};
    use std::time::Duration;
    use toolrelay_core::message::Role;

    fn invoker(parallel: bool) -> ToolInvoker {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(FailingTool));
        registry.register(Box::new(SlowTool::new("slow", Duration::from_millis(200))));
        ToolInvoker::new(Arc::new(registry), Arc::new(EventBus::default())).with_parallel(parallel)
    }

    fn drain(rx: &mut mpsc::Receiver<LoopEvent>) -> Vec<LoopEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_request_order_and_events_follow_completion() {
        let invoker = invoker(true);
        let (tx, mut rx) = mpsc::channel(16);
        let calls = vec![
            ToolCall::new("a", "slow", serde_json::json!({})),
            ToolCall::new("b", "echo", serde_json::json!({"text": "fast"})),
        ];

        let messages = invoker.invoke(&ThreadId::from("t"), &calls, &tx).await;

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].tool_call_id.as_deref(), Some("a"));
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("b"));
        assert!(messages.iter().all(|m| m.role() == Role::Tool));
        assert_eq!(messages[1].content, "fast");

        let resolved: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                LoopEvent::ToolResolved { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(resolved, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn all_dispatches_precede_resolutions() {
        let invoker = invoker(true);
        let (tx, mut rx) = mpsc::channel(16);
        let calls = vec![
            ToolCall::new("a", "echo", serde_json::json!({"text": "1"})),
            ToolCall::new("b", "echo", serde_json::json!({"text": "2"})),
        ];
        invoker.invoke(&ThreadId::from("t"), &calls, &tx).await;

        let kinds: Vec<bool> = drain(&mut rx)
            .iter()
            .map(|e| matches!(e, LoopEvent::ToolDispatched { .. }))
            .collect();
        assert_eq!(kinds, vec![true, true, false, false]);
    }

    #[tokio::test]
    async fn sequential_calls_are_dispatched_one_at_a_time() {
        let invoker = invoker(false);
        let (tx, mut rx) = mpsc::channel(16);
        let calls = vec![
            ToolCall::new("a", "echo", serde_json::json!({"text": "1"})),
            ToolCall::new("b", "echo", serde_json::json!({"text": "2"})),
        ];
        invoker.invoke(&ThreadId::from("t"), &calls, &tx).await;

        let order: Vec<String> = drain(&mut rx)
            .into_iter()
            .map(|e| match e {
                LoopEvent::ToolDispatched { id, .. } => format!("start {id}"),
                LoopEvent::ToolResolved { id, .. } => format!("end {id}"),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(order, vec!["start a", "end a", "start b", "end b"]);
    }

    #[tokio::test]
    async fn failures_and_unknown_tools_become_error_text() {
        let invoker = invoker(false);
        let (tx, _rx) = mpsc::channel(16);
        let calls = vec![
            ToolCall::new("a", "failing", serde_json::json!({})),
            ToolCall::new("b", "missing", serde_json::json!({})),
        ];
        let messages = invoker.invoke(&ThreadId::from("t"), &calls, &tx).await;

        assert!(messages[0].content.starts_with("Error:"));
        assert!(messages[1].content.contains("missing"));
    }

    #[tokio::test]
    async fn empty_output_gets_placeholder() {
        let invoker = invoker(true);
        let (tx, _rx) = mpsc::channel(16);
        let calls = vec![ToolCall::new("a", "echo", serde_json::json!({"text": ""}))];
        let messages = invoker.invoke(&ThreadId::from("t"), &calls, &tx).await;
        assert_eq!(messages[0].content, EMPTY_RESULT);
    }

    #[tokio::test]
    async fn publishes_tool_executed() {
        let invoker = invoker(true);
        let mut bus_rx = invoker.event_bus.subscribe();
        let (tx, _rx) = mpsc::channel(16);
        let calls = vec![ToolCall::new("a", "failing", serde_json::json!({}))];
        invoker.invoke(&ThreadId::from("t1"), &calls, &tx).await;

        match bus_rx.recv().await.unwrap().as_ref() {
            DomainEvent::ToolExecuted { thread_id, tool_name, success, .. } => {
                assert_eq!(thread_id, "t1");
                assert_eq!(tool_name, "failing");
                assert!(!success);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
