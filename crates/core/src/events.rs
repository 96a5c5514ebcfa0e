// Loop events for streaming
//
// AgentEvent is what callers observe while a run progresses, at one of two
// granularities: one StepEvent per checkpointed transition, or one
// TokenEvent per streamed text fragment.

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, CheckpointKind};
use crate::error::Result;
use crate::message::Message;

/// Stream of events for one run; dropping it cancels the run
pub type EventStream = BoxStream<'static, Result<AgentEvent>>;

/// Event granularity requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// One event per checkpointed transition
    #[default]
    Steps,
    /// One event per text fragment from the model
    Tokens,
}

impl std::fmt::Display for StreamMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamMode::Steps => write!(f, "steps"),
            StreamMode::Tokens => write!(f, "tokens"),
        }
    }
}

/// A checkpointed transition and the messages it appended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    pub thread_id: String,
    /// Model decision count within the run (0 before the first decision)
    pub iteration: usize,
    pub kind: CheckpointKind,
    /// Step of the checkpoint written for this transition
    pub checkpoint_step: u64,
    pub messages: Vec<Message>,
    pub timestamp: DateTime<Utc>,
}

impl StepEvent {
    pub fn new(checkpoint: &Checkpoint, iteration: usize, messages: &[Message]) -> Self {
        Self {
            thread_id: checkpoint.thread_id.clone(),
            iteration,
            kind: checkpoint.kind,
            checkpoint_step: checkpoint.step,
            messages: messages.to_vec(),
            timestamp: Utc::now(),
        }
    }
}

/// A fragment of model text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEvent {
    pub thread_id: String,
    pub iteration: usize,
    pub text: String,
}

impl TokenEvent {
    pub fn new(thread_id: impl Into<String>, iteration: usize, text: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            iteration,
            text: text.into(),
        }
    }
}

/// Events emitted to callers during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Step(StepEvent),
    Token(TokenEvent),
}

impl AgentEvent {
    pub fn thread_id(&self) -> &str {
        match self {
            AgentEvent::Step(step) => &step.thread_id,
            AgentEvent::Token(token) => &token.thread_id,
        }
    }

    pub fn as_step(&self) -> Option<&StepEvent> {
        match self {
            AgentEvent::Step(step) => Some(step),
            AgentEvent::Token(_) => None,
        }
    }

    pub fn as_token(&self) -> Option<&TokenEvent> {
        match self {
            AgentEvent::Token(token) => Some(token),
            AgentEvent::Step(_) => None,
        }
    }
}

/// Everything the loop generator produces, before filtering by mode
#[derive(Debug, Clone)]
pub(crate) enum LoopEvent {
    Step(StepEvent),
    Token(TokenEvent),
    Finished(String),
}

impl LoopEvent {
    /// The caller-visible event for the given mode, if any
    pub(crate) fn into_public(self, mode: StreamMode) -> Option<AgentEvent> {
        match (self, mode) {
            (LoopEvent::Step(step), StreamMode::Steps) => Some(AgentEvent::Step(step)),
            (LoopEvent::Token(token), StreamMode::Tokens) => Some(AgentEvent::Token(token)),
            _ => None,
        }
    }
}
