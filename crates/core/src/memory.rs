// In-memory implementations for examples and testing
//
// These implementations keep all data in memory, making them perfect for:
// - Standalone examples that don't need a disk
// - Unit tests
// - Scripted CLI runs

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream as futures_stream;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::checkpoint::{validate_thread_id, Checkpoint, CheckpointKind};
use crate::error::{AgentLoopError, Result};
use crate::llm::{Decision, Fragment, FragmentStream};
use crate::message::Message;
use crate::state::ConversationState;
use crate::tool_types::{ToolCall, ToolSchema};
use crate::traits::{CheckpointStore, CheckpointStream, LlmProvider};

// ============================================================================
// InMemoryCheckpointStore - Stores checkpoints in memory
// ============================================================================

#[derive(Debug, Default)]
struct CheckpointTable {
    threads: HashMap<String, Vec<Checkpoint>>,
    unavailable: bool,
    writes_left: Option<usize>,
}

impl CheckpointTable {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(AgentLoopError::storage("checkpoint store is unavailable"));
        }
        Ok(())
    }
}

/// In-memory checkpoint store
///
/// Stores checkpoints in a HashMap keyed by thread ID. Can simulate an
/// unreachable medium for failure tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCheckpointStore {
    table: Arc<RwLock<CheckpointTable>>,
}

impl InMemoryCheckpointStore {
    /// Create a new in-memory checkpoint store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a storage error
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.table.write().await.unavailable = unavailable;
    }

    /// Allow `writes` more saves, then fail every later save
    pub async fn fail_after(&self, writes: usize) {
        self.table.write().await.writes_left = Some(writes);
    }

    /// Undo `set_unavailable` and `fail_after`
    pub async fn recover(&self) {
        let mut table = self.table.write().await;
        table.unavailable = false;
        table.writes_left = None;
    }

    /// Total number of checkpoints across threads
    pub async fn checkpoint_count(&self) -> usize {
        self.table
            .read()
            .await
            .threads
            .values()
            .map(|checkpoints| checkpoints.len())
            .sum()
    }

    /// Pre-populate a thread with a single checkpoint (useful for testing)
    pub async fn seed(&self, thread_id: &str, messages: Vec<Message>, kind: CheckpointKind) {
        let state = ConversationState::from(messages);
        let checkpoint = Checkpoint::new(thread_id, 0, kind, &state);
        self.table
            .write()
            .await
            .threads
            .insert(thread_id.to_string(), vec![checkpoint]);
    }

    /// Clear all checkpoints
    pub async fn clear(&self) {
        self.table.write().await.threads.clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
        kind: CheckpointKind,
    ) -> Result<Checkpoint> {
        validate_thread_id(thread_id)?;

        let mut table = self.table.write().await;
        table.check_available()?;
        if let Some(left) = table.writes_left.as_mut() {
            if *left == 0 {
                return Err(AgentLoopError::storage("checkpoint store rejected the write"));
            }
            *left -= 1;
        }

        let checkpoints = table.threads.entry(thread_id.to_string()).or_default();
        let checkpoint = Checkpoint::new(thread_id, checkpoints.len() as u64, kind, state);
        checkpoints.push(checkpoint.clone());
        Ok(checkpoint)
    }

    fn list_checkpoints<'a>(&'a self, thread_id: &'a str) -> CheckpointStream<'a> {
        Box::pin(stream! {
            if let Err(e) = validate_thread_id(thread_id) {
                yield Err(e);
                return;
            }

            let snapshot = {
                let table = self.table.read().await;
                table
                    .check_available()
                    .map(|_| table.threads.get(thread_id).cloned().unwrap_or_default())
            };

            match snapshot {
                Ok(checkpoints) => {
                    for checkpoint in checkpoints {
                        yield Ok(checkpoint);
                    }
                }
                Err(e) => yield Err(e),
            }
        })
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        validate_thread_id(thread_id)?;
        let table = self.table.read().await;
        table.check_available()?;
        Ok(table
            .threads
            .get(thread_id)
            .and_then(|checkpoints| checkpoints.last().cloned()))
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        validate_thread_id(thread_id)?;
        let mut table = self.table.write().await;
        table.check_available()?;
        table.threads.remove(thread_id);
        Ok(())
    }

    async fn threads(&self) -> Result<Vec<String>> {
        let table = self.table.read().await;
        table.check_available()?;
        let mut ids: Vec<String> = table.threads.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

// ============================================================================
// MockLlmProvider - Returns predefined responses
// ============================================================================

/// A scripted model response
///
/// In YAML, read lists of these through
/// `serde_yaml::with::singleton_map_recursive` so `- text: hi` maps parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockLlmResponse {
    /// Final answer, streamed word by word
    Text(String),
    /// Tool call request
    ToolCalls(Vec<ToolCall>),
    /// Fail with ModelUnavailable
    Unavailable(String),
}

impl MockLlmResponse {
    /// Create a text-only response
    pub fn text(text: impl Into<String>) -> Self {
        MockLlmResponse::Text(text.into())
    }

    /// Create a response with tool calls
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        MockLlmResponse::ToolCalls(calls)
    }

    /// Create an unavailability failure
    pub fn unavailable(reason: impl Into<String>) -> Self {
        MockLlmResponse::Unavailable(reason.into())
    }

    fn into_fragments(self) -> Result<Vec<Result<Fragment>>> {
        match self {
            MockLlmResponse::Text(text) => {
                let mut fragments: Vec<Result<Fragment>> = text
                    .split_inclusive(' ')
                    .map(|word| Ok(Fragment::text(word)))
                    .collect();
                fragments.push(Ok(Fragment::done(Decision::final_answer(text))));
                Ok(fragments)
            }
            MockLlmResponse::ToolCalls(calls) => {
                let mut fragments = vec![Ok(Fragment::text(""))];
                fragments.extend(calls.iter().map(|call| {
                    Ok(Fragment::ToolCallDelta {
                        call_id: call.id.clone(),
                        tool_name: Some(call.name.clone()),
                        arguments_delta: call.arguments.to_string(),
                    })
                }));
                fragments.push(Ok(Fragment::done(Decision::tool_calls(calls))));
                Ok(fragments)
            }
            MockLlmResponse::Unavailable(reason) => Err(AgentLoopError::model(reason)),
        }
    }
}

/// Mock LLM provider for testing
///
/// Returns predefined responses in sequence. Running past the end of the
/// script is reported as model unavailability.
#[derive(Debug, Default, Clone)]
pub struct MockLlmProvider {
    responses: Arc<Vec<MockLlmResponse>>,
    call_index: Arc<RwLock<usize>>,
    call_log: Arc<RwLock<Vec<Vec<Message>>>>,
    schema_log: Arc<RwLock<Vec<Vec<ToolSchema>>>>,
}

impl MockLlmProvider {
    /// Create a new mock LLM provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider with a full script
    pub fn with_responses(responses: Vec<MockLlmResponse>) -> Self {
        Self {
            responses: Arc::new(responses),
            ..Self::default()
        }
    }

    /// Messages passed to each call, in call order
    pub async fn calls(&self) -> Vec<Vec<Message>> {
        self.call_log.read().await.clone()
    }

    /// Tool schemas passed to each call, in call order
    pub async fn schemas(&self) -> Vec<Vec<ToolSchema>> {
        self.schema_log.read().await.clone()
    }

    /// Number of calls made so far
    pub async fn call_count(&self) -> usize {
        self.call_log.read().await.len()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn decide_streaming(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<FragmentStream> {
        self.call_log.write().await.push(messages.to_vec());
        self.schema_log.write().await.push(tools.to_vec());

        let response = {
            let mut index = self.call_index.write().await;
            let response = self.responses.get(*index).cloned();
            *index += 1;
            response
        };

        let response = response
            .ok_or_else(|| AgentLoopError::model("no more scripted responses"))?;
        let fragments = response.into_fragments()?;

        Ok(Box::pin(futures_stream::iter(fragments)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_store_steps_increase() {
        let store = InMemoryCheckpointStore::new();
        let mut state = ConversationState::new();
        state.push(Message::user("Hello"));

        let first = store
            .save("t1", &state, CheckpointKind::ToolCallsRequested)
            .await
            .unwrap();
        state.push(Message::assistant("Hi"));
        let second = store.save("t1", &state, CheckpointKind::Final).await.unwrap();

        assert_eq!(first.step, 0);
        assert_eq!(second.step, 1);

        let loaded = store.load("t1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(store.load("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_checkpoints_is_restartable() {
        let store = InMemoryCheckpointStore::new();
        let state = ConversationState::from(vec![Message::user("hi")]);
        for _ in 0..3 {
            store.save("t1", &state, CheckpointKind::ToolResults).await.unwrap();
        }

        let first: Vec<_> = store.list_checkpoints("t1").collect().await;
        let second: Vec<_> = store.list_checkpoints("t1").collect().await;
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 3);

        let steps: Vec<u64> = first.into_iter().map(|c| c.unwrap().step).collect();
        assert_eq!(steps, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = InMemoryCheckpointStore::new();
        store.set_unavailable(true).await;

        let state = ConversationState::from(vec![Message::user("hi")]);
        let err = store
            .save("t1", &state, CheckpointKind::Final)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentLoopError::Storage(_)));
        assert!(store.load("t1").await.is_err());
    }

    #[tokio::test]
    async fn test_fail_after() {
        let store = InMemoryCheckpointStore::new();
        store.fail_after(1).await;

        let state = ConversationState::from(vec![Message::user("hi")]);
        assert!(store.save("t1", &state, CheckpointKind::Final).await.is_ok());
        assert!(store.save("t1", &state, CheckpointKind::Final).await.is_err());
        assert_eq!(store.checkpoint_count().await, 1);
    }

    #[tokio::test]
    async fn test_threads_sorted_and_deletable() {
        let store = InMemoryCheckpointStore::new();
        let state = ConversationState::from(vec![Message::user("hi")]);
        store.save("b", &state, CheckpointKind::Final).await.unwrap();
        store.save("a", &state, CheckpointKind::Final).await.unwrap();

        assert_eq!(store.threads().await.unwrap(), vec!["a", "b"]);
        store.delete_thread("a").await.unwrap();
        assert_eq!(store.threads().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_mock_text_streams_word_by_word() {
        let llm = MockLlmProvider::with_responses(vec![MockLlmResponse::text("It is 72F.")]);

        let fragments: Vec<Fragment> = llm
            .decide_streaming(&[Message::user("weather?")], &[])
            .await
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
            .await;

        assert_eq!(fragments.len(), 4);
        assert_eq!(fragments[0], Fragment::text("It "));
        assert_eq!(
            fragments[3],
            Fragment::done(Decision::final_answer("It is 72F."))
        );
        assert_eq!(llm.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_mock_tool_calls_and_exhaustion() {
        let call = ToolCall::new("c1", "search", json!({"query": "weather sf"}));
        let llm = MockLlmProvider::with_responses(vec![MockLlmResponse::tool_calls(vec![
            call.clone(),
        ])]);

        let decision = llm.decide(&[Message::user("weather?")], &[]).await.unwrap();
        assert_eq!(decision, Decision::tool_calls(vec![call]));

        let err = llm.decide(&[], &[]).await.unwrap_err();
        assert!(matches!(err, AgentLoopError::ModelUnavailable(_)));
    }

    #[test]
    fn test_script_deserializes_from_yaml() {
        let yaml = r#"
- text: "hello"
- tool_calls:
    - id: c1
      name: search
      arguments: {query: weather}
- unavailable: timeout
"#;
        let script: Vec<MockLlmResponse> = serde_yaml::with::singleton_map_recursive::deserialize(
            serde_yaml::Deserializer::from_str(yaml),
        )
        .unwrap();
        assert_eq!(script.len(), 3);
        assert_eq!(script[0], MockLlmResponse::text("hello"));
        assert_eq!(
            script[1],
            MockLlmResponse::tool_calls(vec![ToolCall::new(
                "c1",
                "search",
                json!({"query": "weather"})
            )])
        );
        assert_eq!(script[2], MockLlmResponse::unavailable("timeout"));
    }
}
