// Language model contract types
//
// The language model is an external collaborator. The loop only needs a
// Decision per step, either in one piece or as a stream of Fragments that
// ends with the Decision.

use std::collections::HashSet;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{AgentLoopError, Result};
use crate::tool_types::ToolCall;

/// Type alias for a streamed decision
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment>> + Send>>;

/// The model's output for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    /// Final text answer, ends the turn
    Final { content: String },
    /// Request to invoke tools, in order
    ToolCallRequested { calls: Vec<ToolCall> },
}

impl Decision {
    /// Create a final decision
    pub fn final_answer(content: impl Into<String>) -> Self {
        Decision::Final {
            content: content.into(),
        }
    }

    /// Create a tool call decision
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Decision::ToolCallRequested { calls }
    }

    /// Whether the loop should execute tools next.
    ///
    /// An empty call list counts as finalization.
    pub fn requests_tools(&self) -> bool {
        matches!(self, Decision::ToolCallRequested { calls } if !calls.is_empty())
    }

    /// Reject decisions the loop cannot act on.
    ///
    /// Malformed decisions are reported as model unavailability.
    pub fn validate(&self) -> Result<()> {
        let Decision::ToolCallRequested { calls } = self else {
            return Ok(());
        };

        let mut ids = HashSet::new();
        for call in calls {
            if call.id.is_empty() {
                return Err(AgentLoopError::model(format!(
                    "malformed decision: tool call to '{}' has an empty id",
                    call.name
                )));
            }
            if call.name.is_empty() {
                return Err(AgentLoopError::model(format!(
                    "malformed decision: tool call {} has an empty tool name",
                    call.id
                )));
            }
            if !call.arguments.is_object() {
                return Err(AgentLoopError::model(format!(
                    "malformed decision: arguments of tool call {} are not an object",
                    call.id
                )));
            }
            if !ids.insert(call.id.as_str()) {
                return Err(AgentLoopError::model(format!(
                    "malformed decision: duplicate tool call id {}",
                    call.id
                )));
            }
        }
        Ok(())
    }
}

/// One incremental piece of a streamed decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fragment {
    /// Incremental text
    TextDelta { text: String },
    /// Incremental tool call negotiation
    ToolCallDelta {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default)]
        arguments_delta: String,
    },
    /// The stream is complete; carries the authoritative decision
    Done { decision: Decision },
}

impl Fragment {
    /// Create a text fragment
    pub fn text(text: impl Into<String>) -> Self {
        Fragment::TextDelta { text: text.into() }
    }

    /// Create a done fragment
    pub fn done(decision: Decision) -> Self {
        Fragment::Done { decision }
    }
}
