// Tool Abstraction for Agent Loop
//
// This module provides a high-level abstraction for tools that can be executed
// by the agent loop. Tools are defined using the `Tool` trait and can be
// registered with a `ToolRegistry` for use in the loop.
//
// Design decisions:
// - Tools declare an explicit parameter list; schemas are validated on registration
// - Arguments are checked against the declared schema before every execution
// - ToolRegistry implements ToolExecutor for integration with the agent loop
// - Failures become ToolExecutionError values, never loop errors
// - Internal errors are logged but not exposed to the LLM (security)
// - A panicking tool is contained and reported like any other failure

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::{AgentLoopError, Result};
use crate::tool_types::{ParameterSpec, ParameterType, ToolCall, ToolSchema};
use crate::traits::ToolExecutor;

/// Message shown to the model in place of internal error details
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred while executing the tool";

// ============================================================================
// Tool Execution Result - Error Handling Contract
// ============================================================================

/// Result of a tool execution.
///
/// This enum distinguishes between different outcomes:
/// - `Success`: Tool executed successfully, result is returned to LLM
/// - `ToolError`: Tool-level error that should be shown to the LLM
///   (e.g., "City not found", "Invalid date format")
/// - `InternalError`: System-level error that should NOT be exposed to the LLM
///   (e.g., database connection failure, API key issues)
#[derive(Debug)]
pub enum ToolExecutionResult {
    /// Successful execution; strings are used verbatim, other values as JSON text
    Success(Value),

    /// Tool-level error that is safe to show to the LLM
    ToolError(String),

    /// Internal/system error that should NOT be exposed to the LLM
    InternalError(ToolInternalError),
}

impl ToolExecutionResult {
    /// Create a successful result
    pub fn success(value: impl Into<Value>) -> Self {
        ToolExecutionResult::Success(value.into())
    }

    /// Create a tool-level error (safe to show to LLM)
    pub fn tool_error(message: impl Into<String>) -> Self {
        ToolExecutionResult::ToolError(message.into())
    }

    /// Create an internal error (will be hidden from LLM)
    pub fn internal_error(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        ToolExecutionResult::InternalError(ToolInternalError::new(error))
    }

    /// Create an internal error from a string message
    pub fn internal_error_msg(message: impl Into<String>) -> Self {
        ToolExecutionResult::InternalError(ToolInternalError::from_message(message))
    }

    /// Check if this is a successful result
    pub fn is_success(&self) -> bool {
        matches!(self, ToolExecutionResult::Success(_))
    }

    /// Convert into the text recorded in the tool message.
    ///
    /// Internal errors are logged but replaced with a generic message.
    pub fn into_output(self, call: &ToolCall) -> std::result::Result<String, ToolExecutionError> {
        match self {
            ToolExecutionResult::Success(Value::String(text)) => Ok(text),
            ToolExecutionResult::Success(value) => Ok(value.to_string()),
            ToolExecutionResult::ToolError(message) => {
                Err(ToolExecutionError::new(call, message))
            }
            ToolExecutionResult::InternalError(err) => {
                error!(
                    tool_name = %call.name,
                    tool_call_id = %call.id,
                    error = %err.message,
                    "Tool internal error (details hidden from LLM)"
                );
                Err(ToolExecutionError::new(call, INTERNAL_ERROR_MESSAGE))
            }
        }
    }
}

/// Internal error details (logged but not exposed to LLM)
#[derive(Debug)]
pub struct ToolInternalError {
    /// Error message for logging
    pub message: String,
    /// Optional source error
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ToolInternalError {
    /// Create from an error
    pub fn new(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// Create from a string message
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

impl std::fmt::Display for ToolInternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ToolInternalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// A failed tool invocation.
///
/// The loop records the display text as the tool message content so the
/// model can react to the failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Error: tool '{tool_name}' failed: {message}")]
pub struct ToolExecutionError {
    pub tool_name: String,
    pub call_id: String,
    pub message: String,
}

impl ToolExecutionError {
    pub fn new(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            tool_name: call.name.clone(),
            call_id: call.id.clone(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Tool Trait - Core Tool Abstraction
// ============================================================================

/// Trait for implementing tools that can be executed by the agent loop.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// struct GetWeather;
///
/// #[async_trait]
/// impl Tool for GetWeather {
///     fn name(&self) -> &str {
///         "get_weather"
///     }
///
///     fn description(&self) -> &str {
///         "Current weather for a city"
///     }
///
///     fn parameters(&self) -> Vec<ParameterSpec> {
///         vec![ParameterSpec::required("city", ParameterType::String, "City name")]
///     }
///
///     async fn execute(&self, arguments: Value) -> ToolExecutionResult {
///         let city = arguments["city"].as_str().unwrap_or_default();
///         ToolExecutionResult::success(format!("72F sunny in {city}"))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's unique name.
    ///
    /// This name is used by the LLM to invoke the tool and must be unique
    /// within a ToolRegistry.
    fn name(&self) -> &str;

    /// Returns a description of what the tool does.
    fn description(&self) -> &str;

    /// Declared parameters, in declaration order
    fn parameters(&self) -> Vec<ParameterSpec> {
        Vec::new()
    }

    /// Execute the tool with arguments that already passed schema checks.
    async fn execute(&self, arguments: Value) -> ToolExecutionResult;

    /// Declared schema, as advertised to the model
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

// ============================================================================
// ToolRegistry - Collection of Tools
// ============================================================================

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    schema: ToolSchema,
}

/// A registry that holds multiple tools and implements ToolExecutor.
///
/// # Example
///
/// ```ignore
/// let registry = ToolRegistry::builder()
///     .tool(EchoTool)
///     .tool(GetWeather)
///     .build()?;
///
/// let agent_loop = AgentLoop::new(config, store, llm, registry);
/// ```
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<RegisteredTool>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool with the registry.
    ///
    /// Fails if the declared schema is invalid or the name is taken.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    /// Register an Arc-wrapped tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let schema = tool.schema();
        schema
            .validate()
            .map_err(|e| AgentLoopError::config(e.to_string()))?;

        if self.tools.contains_key(&schema.name) {
            return Err(AgentLoopError::config(format!(
                "tool '{}' is already registered",
                schema.name
            )));
        }

        debug!(tool_name = %schema.name, "Registered tool");
        self.tools
            .insert(schema.name.clone(), Arc::new(RegisteredTool { tool, schema }));
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| entry.tool.clone())
    }

    /// Check if a tool is registered
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get all tool names, sorted
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Create a builder for fluent tool registration
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> =
            self.tools.values().map(|entry| entry.schema.clone()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    fn resolve(&self, call: &ToolCall) -> Result<Arc<dyn Tool>> {
        self.get(&call.name)
            .ok_or_else(|| AgentLoopError::unknown_tool(&call.name, &call.id))
    }

    async fn invoke(
        &self,
        tool: &dyn Tool,
        call: &ToolCall,
    ) -> std::result::Result<String, ToolExecutionError> {
        let checked = match self.tools.get(&call.name) {
            Some(entry) => entry.schema.check_arguments(&call.arguments),
            None => tool.schema().check_arguments(&call.arguments),
        };
        if let Err(message) = checked {
            warn!(
                tool_name = %call.name,
                tool_call_id = %call.id,
                error = %message,
                "Rejected tool arguments"
            );
            return Err(ToolExecutionError::new(
                call,
                format!("invalid arguments: {message}"),
            ));
        }

        let outcome = AssertUnwindSafe(tool.execute(call.arguments.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(result) => result.into_output(call),
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    tool_name = %call.name,
                    tool_call_id = %call.id,
                    panic = %detail,
                    "Tool panicked (details hidden from LLM)"
                );
                Err(ToolExecutionError::new(call, INTERNAL_ERROR_MESSAGE))
            }
        }
    }
}

// ============================================================================
// ToolRegistryBuilder - Fluent API for Building Registry
// ============================================================================

/// Builder for creating a ToolRegistry with a fluent API.
///
/// The first registration failure is reported by `build`.
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
    error: Option<AgentLoopError>,
}

impl ToolRegistryBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            registry: ToolRegistry::new(),
            error: None,
        }
    }

    /// Add a tool to the registry
    pub fn tool(self, tool: impl Tool + 'static) -> Self {
        self.tool_arc(Arc::new(tool))
    }

    /// Add an Arc-wrapped tool to the registry
    pub fn tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.registry.register_arc(tool) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Build the registry
    pub fn build(self) -> Result<ToolRegistry> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.registry),
        }
    }
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// A tool that echoes back its message (useful for testing)
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo back the provided message. Useful for testing tool execution."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::required(
            "message",
            ParameterType::String,
            "The message to echo back",
        )]
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let message = arguments
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        ToolExecutionResult::success(message)
    }
}

/// A tool that returns a fixed output, optionally after a delay.
///
/// Used for scripted runs and for exercising ordering under latency.
pub struct StaticTool {
    schema: ToolSchema,
    output: String,
    delay: Option<Duration>,
}

impl StaticTool {
    pub fn new(schema: ToolSchema, output: impl Into<String>) -> Self {
        Self {
            schema,
            output: output.into(),
            delay: None,
        }
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.schema.name
    }

    fn description(&self) -> &str {
        &self.schema.description
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        self.schema.parameters.clone()
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        ToolExecutionResult::success(self.output.as_str())
    }
}

/// A tool that always fails (useful for testing error handling)
pub struct FailingTool {
    error_message: String,
    use_internal_error: bool,
}

impl FailingTool {
    /// Create a failing tool with a tool-level error
    pub fn with_tool_error(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            use_internal_error: false,
        }
    }

    /// Create a failing tool with an internal error
    pub fn with_internal_error(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            use_internal_error: true,
        }
    }
}

impl Default for FailingTool {
    fn default() -> Self {
        Self::with_tool_error("Tool execution failed")
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing_tool"
    }

    fn description(&self) -> &str {
        "A tool that always fails (for testing error handling)"
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        if self.use_internal_error {
            ToolExecutionResult::internal_error_msg(&self.error_message)
        } else {
            ToolExecutionResult::tool_error(&self.error_message)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "panicky"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
            panic!("boom");
        }
    }

    fn echo_call(arguments: Value) -> ToolCall {
        ToolCall::new("call_1", "echo", arguments)
    }

    #[tokio::test]
    async fn test_echo_tool() {
        let result = EchoTool.execute(json!({"message": "Hello, world!"})).await;

        if let ToolExecutionResult::Success(value) = result {
            assert_eq!(value, json!("Hello, world!"));
        } else {
            panic!("Expected success");
        }
    }

    #[tokio::test]
    async fn test_failing_tool_with_internal_error() {
        let tool = FailingTool::with_internal_error("Database connection failed");

        let result = tool.execute(json!({})).await;

        if let ToolExecutionResult::InternalError(err) = result {
            assert_eq!(err.message, "Database connection failed");
        } else {
            panic!("Expected internal error");
        }
    }

    #[test]
    fn test_into_output() {
        let call = ToolCall::new("call_1", "test_tool", json!({}));

        let text = ToolExecutionResult::success("72F sunny").into_output(&call);
        assert_eq!(text.unwrap(), "72F sunny");

        let value = ToolExecutionResult::success(json!({"value": 42})).into_output(&call);
        assert_eq!(value.unwrap(), r#"{"value":42}"#);

        let err = ToolExecutionResult::tool_error("City not found")
            .into_output(&call)
            .unwrap_err();
        assert_eq!(err.message, "City not found");
        assert_eq!(err.call_id, "call_1");
        assert_eq!(err.to_string(), "Error: tool 'test_tool' failed: City not found");

        let hidden = ToolExecutionResult::internal_error_msg("Secret database error")
            .into_output(&call)
            .unwrap_err();
        assert_eq!(hidden.message, INTERNAL_ERROR_MESSAGE);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let result = ToolRegistry::builder().tool(EchoTool).tool(EchoTool).build();
        assert!(matches!(result, Err(AgentLoopError::Configuration(_))));
    }

    #[test]
    fn test_registry_rejects_invalid_schema() {
        let tool = StaticTool::new(ToolSchema::new("web search", "bad name"), "x");
        let mut registry = ToolRegistry::new();
        assert!(registry.register(tool).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_schemas_sorted_by_name() {
        let registry = ToolRegistry::builder()
            .tool(FailingTool::default())
            .tool(EchoTool)
            .build()
            .unwrap();

        let names: Vec<String> = registry.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["echo", "failing_tool"]);
        assert_eq!(registry.tool_names(), vec!["echo", "failing_tool"]);
    }

    #[test]
    fn test_resolve_unknown_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall::new("c7", "search", json!({}));
        match registry.resolve(&call) {
            Err(AgentLoopError::UnknownTool { tool_name, call_id }) => {
                assert_eq!(tool_name, "search");
                assert_eq!(call_id, "c7");
            }
            other => panic!("expected UnknownTool, got {:?}", other.map(|t| t.schema())),
        }
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let registry = ToolRegistry::builder().tool(EchoTool).build().unwrap();
        let call = echo_call(json!({"message": "test"}));

        let tool = registry.resolve(&call).unwrap();
        let output = registry.invoke(tool.as_ref(), &call).await.unwrap();
        assert_eq!(output, "test");
    }

    #[tokio::test]
    async fn test_invoke_rejects_bad_arguments() {
        let registry = ToolRegistry::builder().tool(EchoTool).build().unwrap();
        let call = echo_call(json!({"message": 5}));

        let tool = registry.resolve(&call).unwrap();
        let err = registry.invoke(tool.as_ref(), &call).await.unwrap_err();
        assert!(err.message.contains("invalid arguments"));
        assert!(err.message.contains("message"));
    }

    #[tokio::test]
    async fn test_invoke_contains_panics() {
        let registry = ToolRegistry::builder().tool(PanickingTool).build().unwrap();
        let call = ToolCall::new("call_p", "panicky", json!({}));

        let tool = registry.resolve(&call).unwrap();
        let err = registry.invoke(tool.as_ref(), &call).await.unwrap_err();
        assert_eq!(err.message, INTERNAL_ERROR_MESSAGE);
        assert_eq!(err.call_id, "call_p");
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_results_keep_request_order() {
        let slow = StaticTool::new(ToolSchema::new("slow", "slow"), "slow done")
            .with_delay(Duration::from_millis(200));
        let fast = StaticTool::new(ToolSchema::new("fast", "fast"), "fast done")
            .with_delay(Duration::from_millis(10));
        let registry = ToolRegistry::builder().tool(slow).tool(fast).build().unwrap();

        let calls: Vec<(Arc<dyn Tool>, ToolCall)> = ["slow", "fast"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let call = ToolCall::new(format!("c{i}"), *name, json!({}));
                (registry.resolve(&call).unwrap(), call)
            })
            .collect();

        let results = registry.execute_parallel(&calls).await;
        assert_eq!(results[0].as_deref(), Ok("slow done"));
        assert_eq!(results[1].as_deref(), Ok("fast done"));
    }
}
