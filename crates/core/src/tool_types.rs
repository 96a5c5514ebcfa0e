// Tool definitions for agent execution
//
// Design Decision: Tools are identified by name (string) for extensibility.
// Parameter schemas are declared explicitly as an ordered list and validated
// when a tool is registered, instead of being derived from Rust types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Maximum tool name length accepted by common model providers
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Tool call from a model decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call
    pub id: String,
    /// Tool name to execute
    pub name: String,
    /// Arguments as a JSON object
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Map::new())
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// JSON type of a declared tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParameterType {
    /// JSON schema type name
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Integer => "integer",
            ParameterType::Boolean => "boolean",
            ParameterType::Object => "object",
            ParameterType::Array => "array",
        }
    }

    /// Check whether a JSON value has this type
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Number => value.is_number(),
            ParameterType::Integer => value.is_i64() || value.is_u64(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Object => value.is_object(),
            ParameterType::Array => value.is_array(),
        }
    }
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single declared tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl ParameterSpec {
    /// A required parameter
    pub fn required(
        name: impl Into<String>,
        kind: ParameterType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
        }
    }

    /// An optional parameter
    pub fn optional(
        name: impl Into<String>,
        kind: ParameterType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: description.into(),
        }
    }
}

/// Errors raised while validating a declared schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("tool name cannot be empty")]
    EmptyName,

    #[error("tool name '{0}' exceeds {max} characters", max = MAX_TOOL_NAME_LEN)]
    NameTooLong(String),

    #[error("tool name '{0}' may only contain ASCII letters, digits, '_' and '-'")]
    InvalidName(String),

    #[error("tool '{tool}' declares a parameter with an empty name")]
    EmptyParameterName { tool: String },

    #[error("tool '{tool}' declares parameter '{parameter}' more than once")]
    DuplicateParameter { tool: String, parameter: String },
}

/// Declared schema for a tool: what the model is told it may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl ToolSchema {
    /// Create a schema without parameters
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Add a parameter
    pub fn parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    /// Validate the schema's shape
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.name.is_empty() {
            return Err(SchemaError::EmptyName);
        }
        if self.name.chars().count() > MAX_TOOL_NAME_LEN {
            return Err(SchemaError::NameTooLong(self.name.clone()));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SchemaError::InvalidName(self.name.clone()));
        }

        let mut seen = std::collections::HashSet::new();
        for param in &self.parameters {
            if param.name.is_empty() {
                return Err(SchemaError::EmptyParameterName {
                    tool: self.name.clone(),
                });
            }
            if !seen.insert(param.name.as_str()) {
                return Err(SchemaError::DuplicateParameter {
                    tool: self.name.clone(),
                    parameter: param.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Check call arguments against the declared parameters.
    ///
    /// Returns a message suitable for showing to the model on mismatch.
    /// Undeclared extra arguments are tolerated.
    pub fn check_arguments(&self, arguments: &Value) -> Result<(), String> {
        let Some(object) = arguments.as_object() else {
            return Err(format!(
                "arguments must be a JSON object, got {}",
                json_type_name(arguments)
            ));
        };

        for param in &self.parameters {
            match object.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(format!("missing required argument '{}'", param.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !param.kind.matches(value) => {
                    return Err(format!(
                        "argument '{}' must be of type {}, got {}",
                        param.name,
                        param.kind,
                        json_type_name(value)
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Render the parameters as a JSON schema object
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut property = Map::new();
            property.insert("type".into(), json!(param.kind.as_str()));
            if !param.description.is_empty() {
                property.insert("description".into(), json!(param.description));
            }
            properties.insert(param.name.clone(), Value::Object(property));
            if param.required {
                required.push(json!(param.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
