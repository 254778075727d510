use async_trait::async_trait;
use schemars::JsonSchema;
use serde_json::Value;
use thiserror::Error;

use crate::content::Content;

/// Error type for tool execution. Carried back to the caller as failure text
/// in the tool result, not as a protocol-level error.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Execution failed: {0}")]
    ExecutionError(String),
    #[error("Schema error: {0}")]
    SchemaError(String),
    #[error("Tool not found: {0}")]
    NotFound(String),
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// A single callable tool: its self-description plus the execution itself.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// The name of the tool
    fn name(&self) -> &'static str;

    /// A description of what the tool does
    fn description(&self) -> &'static str;

    /// JSON schema describing the tool's parameters
    fn schema(&self) -> Value;

    /// Execute the tool with the given parameters
    async fn call(&self, params: Value) -> ToolResult<Vec<Content>>;
}

/// Derive the input schema for a tool from its typed parameter struct.
pub fn generate_schema<T: JsonSchema>() -> ToolResult<Value> {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema).map_err(|e| ToolError::SchemaError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct AlertParams {
        /// Two-letter US state code
        state: String,
    }

    #[test]
    fn generated_schema_is_an_object_with_properties() {
        let schema = generate_schema::<AlertParams>().unwrap();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"].get("state").is_some());
    }

    #[test]
    fn tool_error_display_is_prefixed() {
        let err = ToolError::NotFound("no-such-tool".to_string());
        assert_eq!(err.to_string(), "Tool not found: no-such-tool");
    }
}
