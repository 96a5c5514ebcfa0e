// Core traits for pluggable backends
//
// These traits allow the agent loop to be used with different backends:
// - In-memory implementations for examples and testing
// - File-backed checkpoints for single-node durability
// - Any hosted model behind LlmProvider

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::checkpoint::{Checkpoint, CheckpointKind};
use crate::error::{AgentLoopError, Result};
use crate::llm::{Decision, Fragment, FragmentStream};
use crate::message::Message;
use crate::state::ConversationState;
use crate::tool_types::{ToolCall, ToolSchema};
use crate::tools::{Tool, ToolExecutionError};

// ============================================================================
// CheckpointStore - For persisting conversation state per thread
// ============================================================================

/// Stream of checkpoints, oldest first
pub type CheckpointStream<'a> = BoxStream<'a, Result<Checkpoint>>;

/// Trait for storing and retrieving thread checkpoints
///
/// Implementations must serialize writes for the same thread. The agent loop
/// additionally guarantees a single in-flight run per thread.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a new checkpoint for the thread
    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
        kind: CheckpointKind,
    ) -> Result<Checkpoint>;

    /// Stream the thread's checkpoints, oldest first.
    ///
    /// Every call starts a fresh pass; unknown threads yield nothing.
    fn list_checkpoints<'a>(&'a self, thread_id: &'a str) -> CheckpointStream<'a>;

    /// Latest checkpoint of the thread
    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let mut checkpoints = self.list_checkpoints(thread_id);
        let mut latest = None;
        while let Some(checkpoint) = checkpoints.next().await {
            latest = Some(checkpoint?);
        }
        Ok(latest)
    }

    /// Load the latest state of the thread (empty for unseen threads)
    async fn load(&self, thread_id: &str) -> Result<ConversationState> {
        Ok(self
            .latest(thread_id)
            .await?
            .map(|checkpoint| ConversationState::from(checkpoint.messages))
            .unwrap_or_default())
    }

    /// Remove all checkpoints of a thread
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// Known thread ids, sorted
    async fn threads(&self) -> Result<Vec<String>>;
}

// ============================================================================
// LlmProvider - For obtaining model decisions
// ============================================================================

/// Trait for language model providers
///
/// Implementations handle provider-specific API calls and response parsing.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Ask for the next decision, streamed as fragments ending with `Done`
    async fn decide_streaming(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<FragmentStream>;

    /// Ask for the next decision in one piece (drains the stream)
    async fn decide(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Decision> {
        let mut stream = self.decide_streaming(messages, tools).await?;

        while let Some(fragment) = stream.next().await {
            if let Fragment::Done { decision } = fragment? {
                return Ok(decision);
            }
        }

        Err(AgentLoopError::model("stream ended before a decision"))
    }
}

// ============================================================================
// ToolExecutor - For resolving and executing tool calls
// ============================================================================

/// Trait for executing tool calls
///
/// Tool failures are returned as `ToolExecutionError` values so the loop can
/// report them to the model instead of aborting the turn.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Declared schemas of every available tool
    fn schemas(&self) -> Vec<ToolSchema>;

    /// Resolve the capability for a call; fails with `UnknownTool`
    fn resolve(&self, call: &ToolCall) -> Result<Arc<dyn Tool>>;

    /// Execute a single resolved call
    async fn invoke(
        &self,
        tool: &dyn Tool,
        call: &ToolCall,
    ) -> std::result::Result<String, ToolExecutionError>;

    /// Execute resolved calls one after another, in request order
    async fn execute_batch(
        &self,
        calls: &[(Arc<dyn Tool>, ToolCall)],
    ) -> Vec<std::result::Result<String, ToolExecutionError>> {
        let mut results = Vec::with_capacity(calls.len());
        for (tool, call) in calls {
            results.push(self.invoke(tool.as_ref(), call).await);
        }
        results
    }

    /// Execute resolved calls concurrently; results keep request order
    async fn execute_parallel(
        &self,
        calls: &[(Arc<dyn Tool>, ToolCall)],
    ) -> Vec<std::result::Result<String, ToolExecutionError>> {
        let futures: Vec<_> = calls
            .iter()
            .map(|(tool, call)| self.invoke(tool.as_ref(), call))
            .collect();
        join_all(futures).await
    }
}
