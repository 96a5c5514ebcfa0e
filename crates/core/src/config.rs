// Agent configuration for the loop
//
// AgentConfig is a storage-agnostic configuration struct that can be:
// - Created directly for standalone usage
// - Deserialized from a script or config file
// - Read from THREADLOOP_* environment variables via `from_env`

use serde::{Deserialize, Serialize};

use crate::error::{AgentLoopError, Result};

pub const ENV_SYSTEM_PROMPT: &str = "THREADLOOP_SYSTEM_PROMPT";
pub const ENV_MAX_ITERATIONS: &str = "THREADLOOP_MAX_ITERATIONS";
pub const ENV_PARALLEL_TOOLS: &str = "THREADLOOP_PARALLEL_TOOLS";
pub const ENV_MODEL_RETRIES: &str = "THREADLOOP_MODEL_RETRIES";

/// Configuration for the agent loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// System preamble placed at the start of new threads
    pub system_prompt: Option<String>,

    /// Maximum number of model decisions per run (unbounded when unset)
    pub max_iterations: Option<usize>,

    /// Execute a batch of tool calls concurrently
    pub parallel_tool_calls: bool,

    /// Extra attempts when the model is unavailable
    pub max_model_retries: u32,
}

impl AgentConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from THREADLOOP_* environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through a variable lookup function.
    ///
    /// Unset or empty variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(prompt) = get(ENV_SYSTEM_PROMPT) {
            config.system_prompt = Some(prompt);
        }
        if let Some(raw) = get(ENV_MAX_ITERATIONS) {
            let max = raw.trim().parse::<usize>().map_err(|e| {
                AgentLoopError::config(format!("{ENV_MAX_ITERATIONS}={raw:?}: {e}"))
            })?;
            config.max_iterations = Some(max);
        }
        if let Some(raw) = get(ENV_PARALLEL_TOOLS) {
            config.parallel_tool_calls = parse_flag(&raw).ok_or_else(|| {
                AgentLoopError::config(format!("{ENV_PARALLEL_TOOLS}={raw:?}: expected a boolean"))
            })?;
        }
        if let Some(raw) = get(ENV_MODEL_RETRIES) {
            config.max_model_retries = raw.trim().parse::<u32>().map_err(|e| {
                AgentLoopError::config(format!("{ENV_MODEL_RETRIES}={raw:?}: {e}"))
            })?;
        }

        Ok(config)
    }

    /// Set the system preamble
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set maximum iterations
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Enable or disable concurrent tool execution
    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = parallel;
        self
    }

    /// Set the number of model retries
    pub fn with_max_model_retries(mut self, retries: u32) -> Self {
        self.max_model_retries = retries;
        self
    }

    /// Reject settings the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == Some(0) {
            return Err(AgentLoopError::config("max_iterations must be at least 1"));
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Builder for AgentConfig with fluent API
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self {
            config: AgentConfig::default(),
        }
    }

    /// Set the system prompt
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Set maximum iterations
    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = Some(max);
        self
    }

    pub fn parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.config.parallel_tool_calls = parallel;
        self
    }

    pub fn max_model_retries(mut self, retries: u32) -> Self {
        self.config.max_model_retries = retries;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AgentConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for AgentConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert!(config.system_prompt.is_none());
        assert!(config.max_iterations.is_none());
        assert!(!config.parallel_tool_calls);
        assert_eq!(config.max_model_retries, 0);
    }

    #[test]
    fn test_from_lookup() {
        let config = AgentConfig::from_lookup(lookup(&[
            (ENV_SYSTEM_PROMPT, "Be brief."),
            (ENV_MAX_ITERATIONS, "8"),
            (ENV_PARALLEL_TOOLS, "yes"),
            (ENV_MODEL_RETRIES, "2"),
        ]))
        .unwrap();

        assert_eq!(config.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(config.max_iterations, Some(8));
        assert!(config.parallel_tool_calls);
        assert_eq!(config.max_model_retries, 2);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = AgentConfig::from_lookup(lookup(&[(ENV_MAX_ITERATIONS, "many")]));
        assert!(matches!(result, Err(AgentLoopError::Configuration(_))));

        let result = AgentConfig::from_lookup(lookup(&[(ENV_PARALLEL_TOOLS, "sometimes")]));
        assert!(matches!(result, Err(AgentLoopError::Configuration(_))));
    }

    #[test]
    fn test_empty_values_keep_defaults() {
        let config = AgentConfig::from_lookup(lookup(&[(ENV_SYSTEM_PROMPT, "  ")])).unwrap();
        assert!(config.system_prompt.is_none());
    }

    #[test]
    fn test_builder() {
        let config = AgentConfigBuilder::new()
            .system_prompt("You are terse.")
            .max_iterations(4)
            .parallel_tool_calls(true)
            .build()
            .unwrap();
        assert_eq!(config.max_iterations, Some(4));
        assert!(config.parallel_tool_calls);

        assert!(AgentConfigBuilder::new().max_iterations(0).build().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: AgentConfig = serde_json::from_str(r#"{"max_model_retries": 1}"#).unwrap();
        assert_eq!(config.max_model_retries, 1);
        assert!(config.system_prompt.is_none());
    }
}
