// Loop step representation
//
// The agent loop is a small state machine. LoopState names its states for
// logging; NextStep and ResumePoint are the branch points: what a decision
// leads to, and where a run picks up from a stored thread.

use serde::{Deserialize, Serialize};

use crate::llm::Decision;
use crate::state::ConversationState;
use crate::tool_types::ToolCall;

/// States of the agent loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Waiting for a user message
    AwaitingInput,
    /// Waiting for the model's decision
    Deciding,
    /// Running a batch of tool calls
    ExecutingTools,
    /// Turn complete
    Finalized,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::AwaitingInput => write!(f, "awaiting_input"),
            LoopState::Deciding => write!(f, "deciding"),
            LoopState::ExecutingTools => write!(f, "executing_tools"),
            LoopState::Finalized => write!(f, "finalized"),
        }
    }
}

/// What the loop does after a decision
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    /// Run these calls, then decide again
    Execute(Vec<ToolCall>),
    /// End the turn with this answer
    Finalize(String),
}

impl NextStep {
    /// The loop state this step moves into
    pub fn state(&self) -> LoopState {
        match self {
            NextStep::Execute(_) => LoopState::ExecutingTools,
            NextStep::Finalize(_) => LoopState::Finalized,
        }
    }
}

impl From<Decision> for NextStep {
    /// An empty tool call request finalizes with empty content.
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Final { content } => NextStep::Finalize(content),
            Decision::ToolCallRequested { calls } if calls.is_empty() => {
                NextStep::Finalize(String::new())
            }
            Decision::ToolCallRequested { calls } => NextStep::Execute(calls),
        }
    }
}

/// Where a resumed run continues from
#[derive(Debug, Clone, PartialEq)]
pub enum ResumePoint {
    /// The thread has no history
    Empty,
    /// The latest assistant message has unanswered tool calls
    PendingTools(Vec<ToolCall>),
    /// The model has not answered the latest user or tool message
    Decide,
    /// The turn already ended with this answer
    Finalized(String),
}

impl ResumePoint {
    /// Classify the stored state of a thread
    pub fn of(state: &ConversationState) -> Self {
        if state.is_empty() {
            return ResumePoint::Empty;
        }

        let pending = state.pending_tool_calls();
        if !pending.is_empty() {
            return ResumePoint::PendingTools(pending);
        }

        match state.final_response() {
            Some(content) => ResumePoint::Finalized(content.to_string()),
            None => ResumePoint::Decide,
        }
    }

    /// The loop state a resumed run starts in
    pub fn state(&self) -> LoopState {
        match self {
            ResumePoint::Empty => LoopState::AwaitingInput,
            ResumePoint::PendingTools(_) => LoopState::ExecutingTools,
            ResumePoint::Decide => LoopState::Deciding,
            ResumePoint::Finalized(_) => LoopState::Finalized,
        }
    }
}
