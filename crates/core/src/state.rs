// Conversation state
//
// ConversationState is the ordered, append-only message log of one thread.
// The agent loop works on a transient copy; checkpoint stores own the
// persisted snapshots.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageRole};
use crate::tool_types::ToolCall;

/// Ordered message history for one thread
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// All messages, oldest first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Messages appended after the first `offset`
    pub fn since(&self, offset: usize) -> &[Message] {
        self.messages.get(offset..).unwrap_or(&[])
    }

    /// Whether the thread starts with a system preamble
    pub fn has_system_preamble(&self) -> bool {
        self.messages
            .first()
            .is_some_and(|m| m.role == MessageRole::System)
    }

    /// Consume into the message vector
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Content of the trailing assistant message, if the thread ended a turn
    pub fn final_response(&self) -> Option<&str> {
        self.last()
            .filter(|m| m.is_final_answer())
            .map(|m| m.content.as_str())
    }

    /// Tool calls of the latest assistant message that have no tool message yet.
    ///
    /// Only looks at the trailing assistant turn: once a later assistant
    /// message exists the earlier batch is considered settled.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let Some(position) = self
            .messages
            .iter()
            .rposition(|m| m.role == MessageRole::Assistant)
        else {
            return Vec::new();
        };

        let answered: HashSet<&str> = self.messages[position + 1..]
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        self.messages[position]
            .tool_calls
            .iter()
            .filter(|call| !answered.contains(call.id.as_str()))
            .cloned()
            .collect()
    }

    /// Check structural invariants of the log.
    ///
    /// - only assistant messages carry tool calls
    /// - every tool message answers a call id emitted by an earlier assistant message
    pub fn validate(&self) -> Result<(), String> {
        let mut emitted: HashSet<&str> = HashSet::new();
        for (index, message) in self.messages.iter().enumerate() {
            if message.has_tool_calls() && message.role != MessageRole::Assistant {
                return Err(format!(
                    "message {index} ({}) carries tool calls",
                    message.role
                ));
            }
            match message.role {
                MessageRole::Assistant => {
                    emitted.extend(message.tool_calls.iter().map(|c| c.id.as_str()));
                }
                MessageRole::Tool => {
                    let Some(call_id) = message.tool_call_id.as_deref() else {
                        return Err(format!("tool message {index} has no tool_call_id"));
                    };
                    if !emitted.contains(call_id) {
                        return Err(format!(
                            "tool message {index} answers unknown call id {call_id}"
                        ));
                    }
                }
                MessageRole::System | MessageRole::User => {}
            }
        }
        Ok(())
    }
}

impl From<Vec<Message>> for ConversationState {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl<'a> IntoIterator for &'a ConversationState {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_call() -> ToolCall {
        ToolCall::new("c1", "search", json!({"query": "weather sf"}))
    }

    #[test]
    fn test_pending_tool_calls() {
        let mut state = ConversationState::new();
        state.push(Message::user("weather?"));
        state.push(Message::assistant_with_tools(
            "",
            vec![
                weather_call(),
                ToolCall::new("c2", "search", json!({"query": "time sf"})),
            ],
        ));
        assert_eq!(state.pending_tool_calls().len(), 2);

        state.push(Message::tool("c1", "72F sunny"));
        let pending = state.pending_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "c2");

        state.push(Message::tool("c2", "noon"));
        assert!(state.pending_tool_calls().is_empty());
        assert!(state.final_response().is_none());
    }

    #[test]
    fn test_final_response() {
        let mut state = ConversationState::new();
        state.push(Message::user("hi"));
        assert!(state.final_response().is_none());
        state.push(Message::assistant("hello"));
        assert_eq!(state.final_response(), Some("hello"));
    }

    #[test]
    fn test_validate_accepts_well_formed_log() {
        let state = ConversationState::from(vec![
            Message::system("be brief"),
            Message::user("weather?"),
            Message::assistant_with_tools("", vec![weather_call()]),
            Message::tool("c1", "72F sunny"),
            Message::assistant("It is 72F."),
        ]);
        assert!(state.validate().is_ok());
        assert!(state.has_system_preamble());
    }

    #[test]
    fn test_validate_rejects_orphan_tool_message() {
        let state = ConversationState::from(vec![
            Message::user("weather?"),
            Message::tool("c9", "72F sunny"),
        ]);
        let err = state.validate().unwrap_err();
        assert!(err.contains("c9"));
    }

    #[test]
    fn test_since() {
        let state =
            ConversationState::from(vec![Message::user("a"), Message::assistant("b")]);
        assert_eq!(state.since(1).len(), 1);
        assert!(state.since(5).is_empty());
    }
}
