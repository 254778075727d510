//! Anthropic messages-API client.
//!
//! The API key is only ever sent to the configured endpoint, which defaults
//! to the official Anthropic URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use stormdesk_core::Tool;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to reach the Anthropic API: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Anthropic API error ({status}): {body}")]
    Api { status: u16, body: String },
}

/// One completion request against the messages API.
#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<MessageParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageParam {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message content is either a bare string or a list of blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// Block types this client does not act on (thinking, citations, ...).
    #[serde(other)]
    Unknown,
}

/// Tool declaration in the shape the messages API expects. Note the
/// snake_case `input_schema`, unlike the camelCase tool-channel form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<Tool> for ToolSpec {
    fn from(tool: Tool) -> Self {
        ToolSpec {
            name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// The completion surface the chat session talks to, kept as a trait so
/// orchestration tests can script responses.
#[async_trait]
pub trait ModelApi: Send + Sync {
    async fn complete(&self, request: MessagesRequest) -> Result<MessagesResponse, ModelError>;
}

pub struct AnthropicClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: ANTHROPIC_API_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Point the client at a different endpoint. Tests use this to talk to a
    /// local fixture server.
    pub fn with_api_url<S: Into<String>>(mut self, url: S) -> Self {
        self.api_url = url.into();
        self
    }
}

#[async_trait]
impl ModelApi for AnthropicClient {
    async fn complete(&self, request: MessagesRequest) -> Result<MessagesResponse, ModelError> {
        let response = self
            .http
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<MessagesResponse>().await?)
    }
}
