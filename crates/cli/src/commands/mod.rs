// CLI commands

pub mod run;
pub mod threads;

use threadloop_core::{Message, MessageRole};

/// One-line text rendering of a message
pub fn describe_message(message: &Message) -> String {
    match message.role {
        MessageRole::Assistant if message.has_tool_calls() => message
            .tool_calls
            .iter()
            .map(|call| format!("-> {}({}) [{}]", call.name, call.arguments, call.id))
            .collect::<Vec<_>>()
            .join("\n"),
        MessageRole::Assistant => format!("Agent: {}", message.content),
        MessageRole::Tool => format!(
            "<- [{}] {}",
            message.tool_call_id.as_deref().unwrap_or("?"),
            message.content
        ),
        MessageRole::User => format!("You: {}", message.content),
        MessageRole::System => format!("System: {}", message.content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use threadloop_core::ToolCall;

    #[test]
    fn test_describe_message() {
        let call = ToolCall::new("c1", "search", json!({"query": "sf"}));
        assert_eq!(
            describe_message(&Message::assistant_with_tools("", vec![call])),
            r#"-> search({"query":"sf"}) [c1]"#
        );
        assert_eq!(
            describe_message(&Message::tool("c1", "72F sunny")),
            "<- [c1] 72F sunny"
        );
        assert_eq!(describe_message(&Message::assistant("Hi")), "Agent: Hi");
    }
}
