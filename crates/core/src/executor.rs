// Agent Loop Executor
//
// The main orchestrator for the agentic loop. Coordinates:
// - Loading thread state from the CheckpointStore
// - Obtaining decisions via LlmProvider
// - Executing tools via ToolExecutor
// - Checkpointing after every transition
// - Streaming step or token events to the caller
//
// Every run is a lazy stream. Blocking calls (`submit`, `resume`) drain the
// same stream, so all entry points share one state machine.

use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{validate_thread_id, CheckpointKind};
use crate::config::AgentConfig;
use crate::error::{AgentLoopError, Result};
use crate::events::{EventStream, LoopEvent, StepEvent, StreamMode, TokenEvent};
use crate::lease::ThreadLeases;
use crate::llm::{Decision, Fragment};
use crate::message::Message;
use crate::step::{LoopState, NextStep, ResumePoint};
use crate::tool_types::{ToolCall, ToolSchema};
use crate::tools::Tool;
use crate::traits::{CheckpointStore, CheckpointStream, LlmProvider, ToolExecutor};

type LoopStream = BoxStream<'static, Result<LoopEvent>>;

/// How a run starts
enum RunInput {
    Message(String),
    Resume,
}

/// The Agent Loop executor
///
/// Orchestrates the agentic loop with pluggable backends for:
/// - Checkpoint storage (CheckpointStore)
/// - Model decisions (LlmProvider)
/// - Tool execution (ToolExecutor)
pub struct AgentLoop<S, L, T>
where
    S: CheckpointStore,
    L: LlmProvider,
    T: ToolExecutor,
{
    /// Configuration for this agent
    config: AgentConfig,
    /// Checkpoint store for persistence
    checkpoint_store: Arc<S>,
    /// LLM provider for decisions
    llm_provider: Arc<L>,
    /// Tool executor for tool calls
    tool_executor: Arc<T>,
    /// Threads with a run in flight
    leases: ThreadLeases,
}

impl<S, L, T> AgentLoop<S, L, T>
where
    S: CheckpointStore + 'static,
    L: LlmProvider + 'static,
    T: ToolExecutor + 'static,
{
    /// Create a new agent loop
    pub fn new(config: AgentConfig, checkpoint_store: S, llm_provider: L, tool_executor: T) -> Self {
        Self::with_arcs(
            config,
            Arc::new(checkpoint_store),
            Arc::new(llm_provider),
            Arc::new(tool_executor),
        )
    }

    /// Create a new agent loop with Arc-wrapped components
    pub fn with_arcs(
        config: AgentConfig,
        checkpoint_store: Arc<S>,
        llm_provider: Arc<L>,
        tool_executor: Arc<T>,
    ) -> Self {
        Self {
            config,
            checkpoint_store,
            llm_provider,
            tool_executor,
            leases: ThreadLeases::new(),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Get the checkpoint store
    pub fn checkpoint_store(&self) -> &Arc<S> {
        &self.checkpoint_store
    }

    /// Submit a user message and wait for the final answer
    pub async fn submit(&self, thread_id: &str, user_text: impl Into<String>) -> Result<String> {
        let run = self.run(
            thread_id.to_string(),
            RunInput::Message(user_text.into()),
            StreamMode::Steps,
        );
        drain(run).await
    }

    /// Submit a user message and stream the run's events
    pub fn submit_streaming(
        &self,
        thread_id: &str,
        user_text: impl Into<String>,
        mode: StreamMode,
    ) -> EventStream {
        let run = self.run(
            thread_id.to_string(),
            RunInput::Message(user_text.into()),
            mode,
        );
        public_events(run, mode)
    }

    /// Continue a thread from its latest checkpoint without new input
    pub async fn resume(&self, thread_id: &str) -> Result<String> {
        let run = self.run(thread_id.to_string(), RunInput::Resume, StreamMode::Steps);
        drain(run).await
    }

    /// Continue a thread and stream the run's events
    pub fn resume_streaming(&self, thread_id: &str, mode: StreamMode) -> EventStream {
        let run = self.run(thread_id.to_string(), RunInput::Resume, mode);
        public_events(run, mode)
    }

    /// Full message history of a thread, oldest first
    pub async fn get_history(&self, thread_id: &str) -> Result<Vec<Message>> {
        validate_thread_id(thread_id)?;
        let state = self.checkpoint_store.load(thread_id).await?;
        Ok(state.into_messages())
    }

    /// All checkpoints of a thread, oldest first
    pub fn checkpoints<'a>(&'a self, thread_id: &'a str) -> CheckpointStream<'a> {
        if let Err(e) = validate_thread_id(thread_id) {
            return futures::stream::once(async move { Err(e) }).boxed();
        }
        self.checkpoint_store.list_checkpoints(thread_id)
    }

    /// The run generator shared by every entry point
    fn run(&self, thread_id: String, input: RunInput, mode: StreamMode) -> LoopStream {
        let config = self.config.clone();
        let store = self.checkpoint_store.clone();
        let llm = self.llm_provider.clone();
        let tools = self.tool_executor.clone();
        let leases = self.leases.clone();

        Box::pin(stream! {
            // Yield the error and end the run
            macro_rules! attempt {
                ($expr:expr) => {
                    match $expr {
                        Ok(value) => value,
                        Err(e) => {
                            error!(thread_id = %thread_id, error = %e, "Agent loop failed");
                            yield Err(e);
                            return;
                        }
                    }
                };
            }

            attempt!(validate_thread_id(&thread_id));
            let _lease = attempt!(leases.acquire(&thread_id));
            let mut state = attempt!(store.load(&thread_id).await);

            let mut pending = None;
            match input {
                RunInput::Message(text) => {
                    if state.is_empty() {
                        if let Some(prompt) = &config.system_prompt {
                            state.push(Message::system(prompt.clone()));
                        }
                    }
                    state.push(Message::user(text));
                }
                RunInput::Resume => {
                    let point = ResumePoint::of(&state);
                    debug!(thread_id = %thread_id, state = %point.state(), "Resuming thread");
                    match point {
                        ResumePoint::Empty => {
                            attempt!(Err::<(), _>(AgentLoopError::NothingToResume(thread_id.clone())));
                        }
                        ResumePoint::PendingTools(calls) => pending = Some(calls),
                        ResumePoint::Decide => {}
                        ResumePoint::Finalized(content) => {
                            info!(thread_id = %thread_id, "Thread already finalized");
                            yield Ok(LoopEvent::Finished(content));
                            return;
                        }
                    }
                }
            }

            info!(
                thread_id = %thread_id,
                messages = state.len(),
                mode = %mode,
                "Starting agent loop"
            );

            let schemas = tools.schemas();
            let mut iteration = 0usize;

            loop {
                let resolved = match pending.take() {
                    Some(calls) => attempt!(resolve_all(tools.as_ref(), &calls)),
                    None => {
                        iteration += 1;
                        if let Some(max) = config.max_iterations {
                            if iteration > max {
                                warn!(thread_id = %thread_id, max = max, "Max iterations reached");
                                attempt!(Err::<(), _>(AgentLoopError::MaxIterationsReached(max)));
                            }
                        }

                        debug!(
                            thread_id = %thread_id,
                            iteration = iteration,
                            state = %LoopState::Deciding,
                            "Starting iteration"
                        );

                        let mut retries = 0u32;
                        let (decision, fragments) = loop {
                            let outcome = match mode {
                                StreamMode::Steps => llm
                                    .decide(state.messages(), &schemas)
                                    .await
                                    .map(|decision| (decision, Vec::new())),
                                StreamMode::Tokens => {
                                    decide_buffered(llm.as_ref(), state.messages(), &schemas).await
                                }
                            };

                            match outcome.and_then(|(decision, fragments)| {
                                decision.validate().map(|_| (decision, fragments))
                            }) {
                                Ok(decided) => break decided,
                                Err(e) if e.is_transient() && retries < config.max_model_retries => {
                                    retries += 1;
                                    warn!(
                                        thread_id = %thread_id,
                                        iteration = iteration,
                                        attempt = retries,
                                        error = %e,
                                        "Model unavailable, retrying"
                                    );
                                }
                                Err(e) => attempt!(Err::<(), _>(e)),
                            }
                        };

                        match NextStep::from(decision) {
                            NextStep::Finalize(content) => {
                                let offset = state.len();
                                state.push(Message::assistant(content.clone()));
                                let checkpoint = attempt!(
                                    store.save(&thread_id, &state, CheckpointKind::Final).await
                                );
                                for text in final_tokens(&content, fragments) {
                                    yield Ok(LoopEvent::Token(TokenEvent::new(
                                        thread_id.clone(),
                                        iteration,
                                        text,
                                    )));
                                }
                                yield Ok(LoopEvent::Step(StepEvent::new(
                                    &checkpoint,
                                    iteration,
                                    state.since(offset),
                                )));

                                info!(
                                    thread_id = %thread_id,
                                    iterations = iteration,
                                    checkpoint_step = checkpoint.step,
                                    "Agent loop completed"
                                );
                                yield Ok(LoopEvent::Finished(content));
                                return;
                            }
                            NextStep::Execute(calls) => {
                                let resolved = attempt!(resolve_all(tools.as_ref(), &calls));

                                let offset = state.len();
                                state.push(Message::assistant_with_tools("", calls));
                                let checkpoint = attempt!(
                                    store
                                        .save(&thread_id, &state, CheckpointKind::ToolCallsRequested)
                                        .await
                                );
                                yield Ok(LoopEvent::Step(StepEvent::new(
                                    &checkpoint,
                                    iteration,
                                    state.since(offset),
                                )));
                                resolved
                            }
                        }
                    }
                };

                debug!(
                    thread_id = %thread_id,
                    iteration = iteration,
                    tool_calls = resolved.len(),
                    parallel = config.parallel_tool_calls,
                    state = %LoopState::ExecutingTools,
                    "Executing tools"
                );

                let results = if config.parallel_tool_calls {
                    tools.execute_parallel(&resolved).await
                } else {
                    tools.execute_batch(&resolved).await
                };

                let offset = state.len();
                for ((_, call), result) in resolved.iter().zip(results) {
                    let content = match result {
                        Ok(output) => output,
                        Err(e) => {
                            warn!(
                                thread_id = %thread_id,
                                tool_name = %e.tool_name,
                                tool_call_id = %e.call_id,
                                error = %e.message,
                                "Tool call failed"
                            );
                            e.to_string()
                        }
                    };
                    state.push(Message::tool(call.id.clone(), content));
                }

                let checkpoint = attempt!(
                    store.save(&thread_id, &state, CheckpointKind::ToolResults).await
                );
                yield Ok(LoopEvent::Step(StepEvent::new(
                    &checkpoint,
                    iteration,
                    state.since(offset),
                )));
            }
        })
    }
}

/// Resolve every call before anything is appended; one unknown tool fails the batch
fn resolve_all<T: ToolExecutor + ?Sized>(
    tools: &T,
    calls: &[ToolCall],
) -> Result<Vec<(Arc<dyn Tool>, ToolCall)>> {
    calls
        .iter()
        .map(|call| {
            let tool = tools.resolve(call)?;
            Ok((tool, call.clone()))
        })
        .collect()
}

/// Obtain a decision from the fragment stream, keeping its text fragments.
///
/// Text seen after a tool-call fragment is dropped, and a decision that
/// requests tools keeps no text at all.
async fn decide_buffered<L: LlmProvider + ?Sized>(
    llm: &L,
    messages: &[Message],
    schemas: &[ToolSchema],
) -> Result<(Decision, Vec<String>)> {
    let mut stream = llm.decide_streaming(messages, schemas).await?;
    let mut buffered = Vec::new();
    let mut saw_tool_call = false;

    while let Some(fragment) = stream.next().await {
        match fragment? {
            Fragment::TextDelta { text } => {
                if !text.is_empty() && !saw_tool_call {
                    buffered.push(text);
                }
            }
            Fragment::ToolCallDelta { .. } => {
                saw_tool_call = true;
                buffered.clear();
            }
            Fragment::Done { decision } => {
                if decision.requests_tools() {
                    buffered.clear();
                }
                return Ok((decision, buffered));
            }
        }
    }

    Err(AgentLoopError::model("stream ended before a decision"))
}

/// Token texts for a final answer; they always concatenate to `content`
fn final_tokens(content: &str, fragments: Vec<String>) -> Vec<String> {
    if fragments.concat() == content {
        fragments
    } else if content.is_empty() {
        Vec::new()
    } else {
        debug!("Streamed text differs from the final answer, emitting it whole");
        vec![content.to_string()]
    }
}

/// Run to completion and return the final answer
async fn drain(mut run: LoopStream) -> Result<String> {
    while let Some(event) = run.next().await {
        if let LoopEvent::Finished(content) = event? {
            return Ok(content);
        }
    }
    Err(AgentLoopError::Internal(anyhow::anyhow!(
        "run ended without a final answer"
    )))
}

/// Keep the events the caller asked for
fn public_events(run: LoopStream, mode: StreamMode) -> EventStream {
    run.filter_map(move |item| {
        futures::future::ready(match item {
            Ok(event) => event.into_public(mode).map(Ok),
            Err(e) => Some(Err(e)),
        })
    })
    .boxed()
}
