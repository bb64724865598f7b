//! The orchestration loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use toolrelay_config::{AppConfig, TokenMode};
use toolrelay_core::checkpoint::{Checkpoint, CheckpointStore};
use toolrelay_core::error::RunError;
use toolrelay_core::event::{DomainEvent, EventBus};
use toolrelay_core::message::{Message, Role, ThreadId};
use toolrelay_core::provider::Provider;
use toolrelay_core::store::ChatStore;
use toolrelay_core::stream::StreamEvent;
use toolrelay_core::tool::{ToolCall, ToolRegistry};
use tracing::{debug, info, warn};

use crate::checkpoint::InMemoryCheckpointStore;
use crate::history::{HistoryPreparer, TrimPolicy};
use crate::invoker::ToolInvoker;
use crate::routing::{State, next_state};
use crate::step::{AgentStep, ModelSettings, StepError};
use crate::translator::{EventTranslator, LoopEvent};

/// Buffered events between the loop, the translator, and the client.
const CHANNEL_CAPACITY: usize = 64;

/// Drives runs: reasoning passes and tool batches until a final answer.
///
/// Cloning is cheap; each run works on its own clone inside a spawned task.
#[derive(Clone)]
pub struct Orchestrator {
    step: AgentStep,
    invoker: ToolInvoker,
    history: HistoryPreparer,
    checkpoints: Arc<dyn CheckpointStore>,
    chat_store: Option<Arc<dyn ChatStore>>,
    event_bus: Arc<EventBus>,
    max_iterations: u32,
    run_timeout: Duration,
    token_mode: TokenMode,
}

/// What a successful run produced.
#[derive(Debug)]
struct RunSummary {
    answer: Message,
    iterations: u32,
    tool_calls: usize,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        settings: ModelSettings,
    ) -> Self {
        let event_bus = Arc::new(EventBus::default());
        Self {
            step: AgentStep::new(provider, settings, tools.definitions()),
            invoker: ToolInvoker::new(tools, Arc::clone(&event_bus)),
            history: HistoryPreparer::new(TrimPolicy::max_messages(10)),
            checkpoints: Arc::new(InMemoryCheckpointStore::default()),
            chat_store: None,
            event_bus,
            max_iterations: 25,
            run_timeout: Duration::from_secs(300),
            token_mode: TokenMode::default(),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let settings = ModelSettings {
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
        };
        Self::new(provider, tools, settings)
            .with_history(HistoryPreparer::from_config(
                &config.history,
                config.system_prompt.clone(),
            ))
            .with_checkpoint_store(Arc::new(InMemoryCheckpointStore::from_config(
                &config.checkpoint,
            )))
            .with_max_iterations(config.agent.max_iterations)
            .with_run_timeout(Duration::from_secs(config.agent.run_timeout_secs))
            .with_token_mode(config.agent.token_mode)
            .with_parallel_tools(config.agent.parallel_tools)
    }

    pub fn with_history(mut self, history: HistoryPreparer) -> Self {
        self.history = history;
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    /// Persist each final answer to this store before reporting `Done`.
    pub fn with_chat_store(mut self, store: Arc<dyn ChatStore>) -> Self {
        self.chat_store = Some(store);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.invoker = self.invoker.with_event_bus(Arc::clone(&bus));
        self.event_bus = bus;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_token_mode(mut self, mode: TokenMode) -> Self {
        self.token_mode = mode;
        self
    }

    pub fn with_parallel_tools(mut self, parallel: bool) -> Self {
        self.invoker = self.invoker.with_parallel(parallel);
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Start a run and return its client event stream.
    ///
    /// `history` is the thread's prior conversation; `user_message` is
    /// appended to it. The stream begins with `Connected` and ends with
    /// exactly one `Done` or `Error`. Dropping the receiver aborts the run
    /// at its next suspension point.
    pub fn run(
        &self,
        thread_id: ThreadId,
        history: Vec<Message>,
        user_message: Message,
    ) -> mpsc::Receiver<StreamEvent> {
        let (loop_tx, loop_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (client_tx, client_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(EventTranslator::new(self.token_mode).run(loop_rx, client_tx));

        let mut messages = history;
        messages.push(user_message);
        let this = self.clone();
        tokio::spawn(async move { this.drive(thread_id, messages, loop_tx).await });

        client_rx
    }

    async fn drive(
        self,
        thread_id: ThreadId,
        mut messages: Vec<Message>,
        events: mpsc::Sender<LoopEvent>,
    ) {
        info!(thread_id = %thread_id, history = messages.len(), "Run started");
        self.event_bus.publish(DomainEvent::RunStarted {
            thread_id: thread_id.to_string(),
            history_len: messages.len(),
            timestamp: Utc::now(),
        });

        let run = self.run_loop(&thread_id, &mut messages, &events);
        let outcome = match tokio::time::timeout(self.run_timeout, run).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RunError::Timeout {
                secs: self.run_timeout.as_secs(),
            }),
        };

        let outcome = match outcome {
            Ok(summary) => self.persist(&thread_id, summary).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(summary) => {
                info!(
                    thread_id = %thread_id,
                    iterations = summary.iterations,
                    tool_calls = summary.tool_calls,
                    "Run completed"
                );
                self.event_bus.publish(DomainEvent::RunCompleted {
                    thread_id: thread_id.to_string(),
                    iterations: summary.iterations,
                    tool_calls: summary.tool_calls,
                    timestamp: Utc::now(),
                });
                let _ = events.send(LoopEvent::Finished).await;
            }
            Err(err) => {
                warn!(thread_id = %thread_id, error = %err, "Run failed");
                self.event_bus.publish(DomainEvent::RunFailed {
                    thread_id: thread_id.to_string(),
                    error_message: err.to_string(),
                    timestamp: Utc::now(),
                });
                let _ = events.send(LoopEvent::Failed(err)).await;
            }
        }
    }

    async fn run_loop(
        &self,
        thread_id: &ThreadId,
        messages: &mut Vec<Message>,
        events: &mpsc::Sender<LoopEvent>,
    ) -> Result<RunSummary, RunError> {
        let mut state = State::Agent;
        let mut pending: Vec<ToolCall> = Vec::new();
        let mut iterations = 0u32;
        let mut tool_calls = 0usize;

        loop {
            if events.is_closed() {
                return Err(RunError::Aborted("client disconnected".into()));
            }

            match state {
                State::Agent => {
                    if iterations >= self.max_iterations {
                        return Err(RunError::IterationLimit {
                            max: self.max_iterations,
                        });
                    }
                    iterations += 1;
                    debug!(thread_id = %thread_id, iteration = iterations, "Reasoning pass");

                    let prepared = self.history.prepare(messages);
                    let output = self.step.run(prepared, events).await.map_err(|e| match e {
                        StepError::Backend(e) => RunError::Backend(e.to_string()),
                        StepError::Disconnected => RunError::Aborted("client disconnected".into()),
                    })?;

                    if let Some(usage) = &output.usage {
                        debug!(
                            thread_id = %thread_id,
                            prompt_tokens = usage.prompt_tokens,
                            completion_tokens = usage.completion_tokens,
                            cache_read_tokens = usage.cache_read_tokens,
                            "Pass usage"
                        );
                    }

                    pending = output.message.tool_calls.clone();
                    messages.push(output.message);
                    events
                        .send(LoopEvent::PassComplete {
                            has_tool_calls: !pending.is_empty(),
                        })
                        .await
                        .map_err(|_| RunError::Aborted("client disconnected".into()))?;

                    self.checkpoint(thread_id, messages, iterations).await;
                    state = next_state(messages.last(), &pending);
                }
                State::Tools => {
                    let batch = std::mem::take(&mut pending);
                    debug!(thread_id = %thread_id, calls = batch.len(), "Resolving tool calls");
                    tool_calls += batch.len();

                    let results = self.invoker.invoke(thread_id, &batch, events).await;
                    messages.extend(results);

                    self.checkpoint(thread_id, messages, iterations).await;
                    state = State::Agent;
                }
                State::Terminal => {
                    let answer = messages
                        .last()
                        .filter(|m| m.role() == Role::Assistant)
                        .cloned()
                        .unwrap_or_else(|| Message::assistant(""));
                    return Ok(RunSummary {
                        answer,
                        iterations,
                        tool_calls,
                    });
                }
            }
        }
    }

    /// Save a snapshot. A failing store is logged; the run continues.
    async fn checkpoint(&self, thread_id: &ThreadId, messages: &[Message], iterations: u32) {
        let snapshot = Checkpoint::new(thread_id.clone(), messages.to_vec(), iterations);
        if let Err(e) = self.checkpoints.save(snapshot).await {
            warn!(
                thread_id = %thread_id,
                store = self.checkpoints.name(),
                error = %e,
                "Checkpoint save failed"
            );
        }
    }

    async fn persist(
        &self,
        thread_id: &ThreadId,
        summary: RunSummary,
    ) -> Result<RunSummary, RunError> {
        let Some(store) = &self.chat_store else {
            return Ok(summary);
        };
        let answer = Message::assistant(summary.answer.content.clone());
        store
            .append_message(thread_id, answer)
            .await
            .map_err(|e| RunError::Backend(format!("failed to store the answer: {e}")))?;
        Ok(summary)
    }
}
