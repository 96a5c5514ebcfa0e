// Agent Loop Abstraction
//
// This crate provides a storage-agnostic, streamable, and resumable
// implementation of an agentic loop (model decision → tool execution → repeat)
// with per-thread checkpointing.
//
// Key design decisions:
// - Uses traits (CheckpointStore, LlmProvider, ToolExecutor) for pluggable backends
// - Checkpoints are full snapshots taken after every transition, so any run
//   can be resumed from the latest one
// - Runs are lazy streams of events (steps or tokens); blocking calls drain them
// - One run per thread at a time, enforced with a lease
// - Configuration via AgentConfig (created directly, deserialized, or read from env)
// - Tools are defined via a Tool trait with explicit, validated parameter schemas
// - ToolRegistry implements ToolExecutor for easy tool management
// - Error handling distinguishes between user-visible and internal errors

// Data model
pub mod checkpoint;
pub mod message;
pub mod state;
pub mod tool_types;

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod lease;
pub mod llm;
pub mod step;
pub mod tools;
pub mod traits;

// Storage backends
pub mod file_store;
// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use checkpoint::{validate_thread_id, Checkpoint, CheckpointKind};
pub use config::{AgentConfig, AgentConfigBuilder};
pub use error::{AgentLoopError, Result};
pub use events::{AgentEvent, EventStream, StepEvent, StreamMode, TokenEvent};
pub use executor::AgentLoop;
pub use file_store::FileCheckpointStore;
pub use lease::{ThreadLease, ThreadLeases};
pub use llm::{Decision, Fragment, FragmentStream};
pub use memory::{InMemoryCheckpointStore, MockLlmProvider, MockLlmResponse};
pub use message::{Message, MessageRole};
pub use state::ConversationState;
pub use step::{LoopState, NextStep, ResumePoint};
pub use traits::{CheckpointStore, CheckpointStream, LlmProvider, ToolExecutor};

// Tool abstraction re-exports
pub use tools::{
    EchoTool, FailingTool, StaticTool, Tool, ToolExecutionError, ToolExecutionResult,
    ToolInternalError, ToolRegistry, ToolRegistryBuilder,
};

// Tool types
pub use tool_types::{
    ParameterSpec, ParameterType, SchemaError, ToolCall, ToolSchema, MAX_TOOL_NAME_LEN,
};
