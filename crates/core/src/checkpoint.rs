// Checkpoint types
//
// A checkpoint is a full snapshot of a thread's message log taken between
// state-machine transitions. Checkpoints of one thread are totally ordered
// by `step`, and every snapshot is a prefix of the next one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentLoopError, Result};
use crate::message::Message;
use crate::state::ConversationState;

/// The transition that produced a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// Assistant message with tool calls appended
    ToolCallsRequested,
    /// Tool messages for a whole batch appended
    ToolResults,
    /// Final assistant message appended
    Final,
}

impl std::fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointKind::ToolCallsRequested => write!(f, "tool_calls_requested"),
            CheckpointKind::ToolResults => write!(f, "tool_results"),
            CheckpointKind::Final => write!(f, "final"),
        }
    }
}

/// A durable snapshot of one thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique checkpoint ID
    pub id: Uuid,
    /// Thread this checkpoint belongs to
    pub thread_id: String,
    /// Position in the thread's checkpoint sequence (0-based)
    pub step: u64,
    /// Transition that produced this checkpoint
    pub kind: CheckpointKind,
    /// Full message log at this point
    pub messages: Vec<Message>,
    /// When the checkpoint was written
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a checkpoint for the given step
    pub fn new(
        thread_id: impl Into<String>,
        step: u64,
        kind: CheckpointKind,
        state: &ConversationState,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            thread_id: thread_id.into(),
            step,
            kind,
            messages: state.messages().to_vec(),
            created_at: Utc::now(),
        }
    }

    /// Snapshot as conversation state
    pub fn state(&self) -> ConversationState {
        ConversationState::from(self.messages.clone())
    }

    /// Number of messages in the snapshot
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Validate that a thread ID is safe to use as a storage key.
///
/// Rejects empty ids, path separators, `..`, NUL and control characters.
pub fn validate_thread_id(thread_id: &str) -> Result<()> {
    if thread_id.is_empty() {
        return Err(AgentLoopError::invalid_thread("thread id cannot be empty"));
    }
    if thread_id.contains('/')
        || thread_id.contains('\\')
        || thread_id.contains("..")
        || thread_id.contains('\0')
    {
        return Err(AgentLoopError::invalid_thread(format!(
            "thread id contains invalid characters: {thread_id:?}"
        )));
    }
    if thread_id.chars().any(|c| c.is_control()) {
        return Err(AgentLoopError::invalid_thread(format!(
            "thread id contains control characters: {thread_id:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_validation() {
        assert!(validate_thread_id("t1").is_ok());
        assert!(validate_thread_id("2").is_ok());
        assert!(validate_thread_id("user-42_session.a").is_ok());

        for bad in ["", "../etc", "a/b", "a\\b", "a\0b", "line\nbreak"] {
            assert!(
                matches!(
                    validate_thread_id(bad),
                    Err(AgentLoopError::InvalidThreadId(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_checkpoint_snapshot() {
        let state = ConversationState::from(vec![Message::user("hi"), Message::assistant("yo")]);
        let checkpoint = Checkpoint::new("t1", 0, CheckpointKind::Final, &state);
        assert_eq!(checkpoint.message_count(), 2);
        assert_eq!(checkpoint.state().final_response(), Some("yo"));

        let json = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(json["kind"], "final");
        assert_eq!(json["step"], 0);
    }
}
