//! Event Translator: turns internal loop events into the client stream.
//!
//! The orchestration loop reports what happens on an `mpsc` channel of
//! [`LoopEvent`]s. The translator owns the client-facing ordering rules:
//!
//! - `Connected` first, then exactly one terminal (`Done` or `Error`)
//! - `ToolStart(id)` before `ToolEnd(id)`; a `ToolEnd` for an id that was
//!   never started is dropped
//! - answer `Token`s follow the configured [`TokenMode`]: held until the
//!   pass ends in `FinalAnswerOnly`, so the final answer arrives as one
//!   burst; forwarded as generated in `Immediate`

use std::collections::HashSet;

use tokio::sync::mpsc;
use toolrelay_config::TokenMode;
use toolrelay_core::error::RunError;
use toolrelay_core::stream::StreamEvent;
use tracing::{debug, warn};

/// What the orchestration loop reports while it runs.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    /// A text fragment from the model, in generation order.
    Fragment(String),

    /// A reasoning pass finished.
    PassComplete { has_tool_calls: bool },

    /// A tool call was handed to the tool catalog.
    ToolDispatched {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// A dispatched tool call resolved, successfully or not.
    ToolResolved {
        id: String,
        name: String,
        output: serde_json::Value,
    },

    /// The run reached its final answer.
    Finished,

    /// The run failed.
    Failed(RunError),
}

pub struct EventTranslator {
    mode: TokenMode,
    held: Vec<String>,
    open_tools: HashSet<String>,
    terminated: bool,
}

impl EventTranslator {
    pub fn new(mode: TokenMode) -> Self {
        Self {
            mode,
            held: Vec::new(),
            open_tools: HashSet::new(),
            terminated: false,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Translate one loop event into zero or more stream events.
    pub fn translate(&mut self, event: LoopEvent) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }

        match event {
            LoopEvent::Fragment(text) if text.is_empty() => Vec::new(),
            LoopEvent::Fragment(text) => match self.mode {
                TokenMode::Immediate => vec![StreamEvent::token(text)],
                TokenMode::FinalAnswerOnly => {
                    self.held.push(text);
                    Vec::new()
                }
            },
            LoopEvent::PassComplete { has_tool_calls } => {
                let held = std::mem::take(&mut self.held);
                if has_tool_calls {
                    debug!(fragments = held.len(), "Dropping text of a tool-calling pass");
                    Vec::new()
                } else {
                    held.into_iter().map(StreamEvent::token).collect()
                }
            }
            LoopEvent::ToolDispatched { id, name, input } => {
                self.open_tools.insert(id.clone());
                vec![StreamEvent::ToolStart { id, tool: name, input }]
            }
            LoopEvent::ToolResolved { id, name, output } => {
                if self.open_tools.remove(&id) {
                    vec![StreamEvent::ToolEnd { id, tool: name, output }]
                } else {
                    warn!(id = %id, tool = %name, "Tool resolved without a matching start");
                    Vec::new()
                }
            }
            LoopEvent::Finished => {
                self.terminated = true;
                vec![StreamEvent::Done]
            }
            LoopEvent::Failed(err) => {
                self.terminated = true;
                self.held.clear();
                vec![StreamEvent::error(err.to_string())]
            }
        }
    }

    /// Forward a run's events to the client until a terminal event.
    ///
    /// Emits `Connected` first. If the loop goes away without reporting a
    /// terminal event, the stream ends with an `Error`. Returns when the
    /// client side is closed.
    pub async fn run(
        mut self,
        mut loop_rx: mpsc::Receiver<LoopEvent>,
        client_tx: mpsc::Sender<StreamEvent>,
    ) {
        if client_tx.send(StreamEvent::Connected).await.is_err() {
            return;
        }

        while let Some(event) = loop_rx.recv().await {
            for out in self.translate(event) {
                if client_tx.send(out).await.is_err() {
                    debug!("Client stream closed; stopping translation");
                    return;
                }
            }
            if self.terminated {
                return;
            }
        }

        let _ = client_tx
            .send(StreamEvent::error(
                RunError::Aborted("run ended without a result".into()).to_string(),
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatched(id: &str) -> LoopEvent {
        LoopEvent::ToolDispatched {
            id: id.into(),
            name: "calculator".into(),
            input: serde_json::json!({"expr": "2+2"}),
        }
    }

    fn resolved(id: &str) -> LoopEvent {
        LoopEvent::ToolResolved {
            id: id.into(),
            name: "calculator".into(),
            output: serde_json::json!("4"),
        }
    }

    #[test]
    fn final_answer_only_drops_tool_pass_text() {
        let mut t = EventTranslator::new(TokenMode::FinalAnswerOnly);
        assert!(t.translate(LoopEvent::Fragment("Let me ".into())).is_empty());
        assert!(t.translate(LoopEvent::Fragment("check".into())).is_empty());
        assert!(t.translate(LoopEvent::PassComplete { has_tool_calls: true }).is_empty());

        t.translate(LoopEvent::Fragment("4".into()));
        t.translate(LoopEvent::Fragment("!".into()));
        let out = t.translate(LoopEvent::PassComplete { has_tool_calls: false });
        assert_eq!(out, vec![StreamEvent::token("4"), StreamEvent::token("!")]);
    }

    #[test]
    fn final_answer_only_releases_nothing_before_the_pass_ends() {
        let mut t = EventTranslator::new(TokenMode::FinalAnswerOnly);
        for word in ["The ", "answer ", "is ", "4"] {
            assert!(t.translate(LoopEvent::Fragment(word.into())).is_empty());
        }
        let out = t.translate(LoopEvent::PassComplete { has_tool_calls: false });
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn immediate_mode_forwards_every_fragment() {
        let mut t = EventTranslator::new(TokenMode::Immediate);
        assert_eq!(t.translate(LoopEvent::Fragment("a".into())), vec![StreamEvent::token("a")]);
        assert!(t.translate(LoopEvent::PassComplete { has_tool_calls: true }).is_empty());
        assert!(t.translate(LoopEvent::Fragment(String::new())).is_empty());
    }

    #[test]
    fn tool_pairs_interleave_but_end_needs_start() {
        let mut t = EventTranslator::new(TokenMode::FinalAnswerOnly);
        assert_eq!(t.translate(dispatched("a")).len(), 1);
        assert_eq!(t.translate(dispatched("b")).len(), 1);
        assert_eq!(t.translate(resolved("b")).len(), 1);
        assert_eq!(t.translate(resolved("a")).len(), 1);

        // Already closed, and never opened
        assert!(t.translate(resolved("a")).is_empty());
        assert!(t.translate(resolved("zzz")).is_empty());
    }

    #[test]
    fn nothing_after_terminal() {
        let mut t = EventTranslator::new(TokenMode::FinalAnswerOnly);
        t.translate(LoopEvent::Fragment("partial".into()));
        let out = t.translate(LoopEvent::Failed(RunError::Backend("model down".into())));
        assert_eq!(out, vec![StreamEvent::error("Backend failure: model down")]);
        assert!(t.is_terminated());

        assert!(t.translate(LoopEvent::PassComplete { has_tool_calls: false }).is_empty());
        assert!(t.translate(LoopEvent::Finished).is_empty());
    }

    #[tokio::test]
    async fn run_wraps_stream_with_connected_and_terminal() {
        let (loop_tx, loop_rx) = mpsc::channel(8);
        let (client_tx, mut client_rx) = mpsc::channel(8);
        let translator = EventTranslator::new(TokenMode::FinalAnswerOnly);
        let handle = tokio::spawn(translator.run(loop_rx, client_tx));

        loop_tx.send(LoopEvent::Fragment("hi".into())).await.unwrap();
        loop_tx.send(LoopEvent::PassComplete { has_tool_calls: false }).await.unwrap();
        loop_tx.send(LoopEvent::Finished).await.unwrap();
        handle.await.unwrap();

        let mut events = Vec::new();
        while let Some(e) = client_rx.recv().await {
            events.push(e);
        }
        assert_eq!(
            events,
            vec![StreamEvent::Connected, StreamEvent::token("hi"), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn vanished_loop_ends_with_error() {
        let (loop_tx, loop_rx) = mpsc::channel(8);
        let (client_tx, mut client_rx) = mpsc::channel(8);
        drop(loop_tx);

        EventTranslator::new(TokenMode::FinalAnswerOnly).run(loop_rx, client_tx).await;

        assert_eq!(client_rx.recv().await, Some(StreamEvent::Connected));
        match client_rx.recv().await {
            Some(StreamEvent::Error { error }) => assert!(error.contains("without a result")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(client_rx.recv().await, None);
    }
}
