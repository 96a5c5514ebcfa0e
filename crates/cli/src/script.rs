// Script loading
//
// A script describes one offline agent setup:
//
// ```yaml
// agent:
//   system_prompt: "Answer briefly."
//   max_iterations: 5
// tools:
//   - name: search
//     description: Search the web
//     parameters:
//       - {name: query, type: string, required: true}
//     output: "72F sunny"
// responses:
//   - tool_calls:
//       - {id: c1, name: search, arguments: {query: weather sf}}
//   - text: "It is 72F and sunny in SF."
// ```
//
// The built-in echo tool is always registered.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use threadloop_core::{
    AgentConfig, EchoTool, Message, MessageRole, MockLlmProvider, MockLlmResponse, StaticTool,
    ToolRegistry, ToolSchema,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Script {
    /// Agent settings; read from the environment when absent
    pub agent: Option<AgentConfig>,
    pub tools: Vec<ScriptedTool>,
    /// Written as `- text: ...` maps rather than YAML tags
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub responses: Vec<MockLlmResponse>,
}

/// A tool that always returns the same output
#[derive(Debug, Deserialize)]
pub struct ScriptedTool {
    #[serde(flatten)]
    pub schema: ToolSchema,
    pub output: String,
    #[serde(default)]
    pub delay_ms: u64,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid script {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn config(&self) -> Result<AgentConfig> {
        let config = match &self.agent {
            Some(config) => config.clone(),
            None => AgentConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn registry(&self) -> Result<ToolRegistry> {
        let mut builder = ToolRegistry::builder().tool(EchoTool);
        for tool in &self.tools {
            let mut static_tool = StaticTool::new(tool.schema.clone(), tool.output.clone());
            if tool.delay_ms > 0 {
                static_tool = static_tool.with_delay(Duration::from_millis(tool.delay_ms));
            }
            builder = builder.tool(static_tool);
        }
        Ok(builder.build()?)
    }

    pub fn provider(&self) -> MockLlmProvider {
        MockLlmProvider::with_responses(self.responses.clone())
    }

    /// Provider that continues the script for a thread's open turn
    pub fn provider_for(&self, messages: &[Message]) -> MockLlmProvider {
        MockLlmProvider::with_responses(self.pending_responses(messages).to_vec())
    }

    /// Responses not yet consumed by the open turn in `messages`.
    ///
    /// Each assistant message after the last user message used up one
    /// response, along with any `unavailable` entries retried before it.
    pub fn pending_responses(&self, messages: &[Message]) -> &[MockLlmResponse] {
        let mut answered = messages
            .iter()
            .rev()
            .take_while(|m| m.role != MessageRole::User)
            .filter(|m| m.role == MessageRole::Assistant)
            .count();

        let mut skipped = 0;
        for response in &self.responses {
            if answered == 0 {
                break;
            }
            skipped += 1;
            if !matches!(response, MockLlmResponse::Unavailable(_)) {
                answered -= 1;
            }
        }
        &self.responses[skipped..]
    }
}
