//! Two-round chat orchestration: one model round with tools declared, one
//! follow-up round per tool call with the tool result fed back.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use stormdesk_core::protocol::CallToolResult;

use crate::client::{ClientCapabilities, ClientInfo, Error as ClientError, ToolClient, ToolClientTrait};
use crate::model::{
    AnthropicClient, ContentBlock, MessageContent, MessageParam, MessagesRequest, ModelApi,
    ModelError, Role, ToolSpec, DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
};
use crate::service::RpcService;
use crate::transport::{StdioTransport, Transport};

/// Default system prompt, compiled into the binary.
pub const SYSTEM_PROMPT: &str = include_str!("../prompts/system.md");

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Server script must be .js or .py")]
    UnsupportedScript,

    #[error("ANTHROPIC_API_KEY is not set")]
    MissingApiKey,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::Error),
}

/// Pick the interpreter for a tool-server script. Anything but a python or
/// node script is rejected here, before any process is spawned or handshake
/// attempted.
pub fn resolve_server_command(script: &str) -> Result<(String, Vec<String>), SessionError> {
    let command = if script.ends_with(".py") {
        if cfg!(windows) {
            "python"
        } else {
            "python3"
        }
    } else if script.ends_with(".js") {
        "node"
    } else {
        return Err(SessionError::UnsupportedScript);
    };

    Ok((command.to_string(), vec![script.to_string()]))
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub max_tokens: u32,
    pub system: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system: Some(SYSTEM_PROMPT.to_string()),
        }
    }
}

/// A connected chat session: a model endpoint, a tool-server client and the
/// tool inventory declared to the model on each query's first round.
pub struct ChatSession {
    model: Arc<dyn ModelApi>,
    tools: Arc<dyn ToolClientTrait>,
    declared: Vec<ToolSpec>,
    config: SessionConfig,
}

impl ChatSession {
    /// Assemble a session from its parts. `connect` is the production path;
    /// this constructor exists so tests can wire in scripted fakes.
    pub fn new(
        model: Arc<dyn ModelApi>,
        tools: Arc<dyn ToolClientTrait>,
        declared: Vec<ToolSpec>,
        config: SessionConfig,
    ) -> Self {
        Self {
            model,
            tools,
            declared,
            config,
        }
    }

    pub async fn connect(script: &str) -> Result<Self, SessionError> {
        Self::connect_with_config(script, SessionConfig::default()).await
    }

    /// Spawn the tool-server script, run the handshake and fetch the tool
    /// inventory. The API key is read afterwards, so a missing key is
    /// reported against a known-good server.
    pub async fn connect_with_config(
        script: &str,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let (command, args) = resolve_server_command(script)?;

        tracing::info!(%command, script, "connecting to tool server");
        let transport = StdioTransport::new(command, args, HashMap::new());
        let handle = transport.start().await?;

        let mut client = ToolClient::new(RpcService::new(handle));
        client
            .initialize(
                ClientInfo {
                    name: "stormdesk".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                ClientCapabilities::default(),
            )
            .await?;
        if let Some(server) = client.server_info() {
            tracing::info!(server = %server.name, version = %server.version, "handshake complete");
        }

        let inventory = client.list_tools(None).await?;
        let names: Vec<&str> = inventory.tools.iter().map(|t| t.name.as_str()).collect();
        tracing::info!(tools = ?names, "tools available");

        let declared = inventory.tools.into_iter().map(ToolSpec::from).collect();

        let api_key =
            std::env::var("ANTHROPIC_API_KEY").map_err(|_| SessionError::MissingApiKey)?;

        Ok(Self {
            model: Arc::new(AnthropicClient::new(api_key)),
            tools: Arc::new(client),
            declared,
            config,
        })
    }

    fn request(&self, messages: Vec<MessageParam>, with_tools: bool) -> MessagesRequest {
        MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: self.config.system.clone(),
            messages,
            tools: with_tools.then(|| self.declared.clone()),
        }
    }

    /// Run one query through the model, forwarding any tool calls to the
    /// tool server and feeding each result back for a follow-up completion.
    ///
    /// Text blocks from the first round only make it into the answer when the
    /// model requested no tool at all; alongside a tool call they are
    /// preamble, and the answer comes from the follow-up round. The follow-up
    /// request re-sends the original user message plus the accumulated
    /// tool-result messages, with no tools declared.
    pub async fn process_query(&self, query: &str) -> Result<String, SessionError> {
        tracing::info!(%query, "processing query");

        let mut messages = vec![MessageParam {
            role: Role::User,
            content: MessageContent::Text(query.to_string()),
        }];

        tracing::debug!("sending query to the model");
        let response = self
            .model
            .complete(self.request(messages.clone(), true))
            .await?;
        tracing::debug!(stop_reason = ?response.stop_reason, "model response received");

        let wants_tools = response
            .content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. }));

        let mut fragments: Vec<String> = Vec::new();

        for block in response.content {
            match block {
                ContentBlock::Text { text } => {
                    if wants_tools {
                        tracing::debug!("skipping preamble text block");
                    } else {
                        fragments.push(text);
                    }
                }
                ContentBlock::ToolUse { id: _, name, input } => {
                    tracing::info!(tool = %name, args = %input, "model requested a tool call");
                    let result = self.tools.call_tool(&name, input).await?;
                    tracing::debug!(tool = %name, "tool result received");

                    messages.push(MessageParam {
                        role: Role::User,
                        content: tool_result_content(&result),
                    });

                    tracing::debug!("sending tool result back to the model");
                    let follow_up = self
                        .model
                        .complete(self.request(messages.clone(), false))
                        .await?;
                    tracing::debug!(stop_reason = ?follow_up.stop_reason, "final answer received");

                    fragments.push(match follow_up.content.into_iter().next() {
                        Some(ContentBlock::Text { text }) => text,
                        _ => String::new(),
                    });
                }
                ContentBlock::Unknown => {}
            }
        }

        tracing::info!("query complete");
        Ok(fragments.join("\n"))
    }

    /// Interactive prompt loop on stdin/stdout. Ends on `quit` or EOF; a
    /// failed query ends the session with the error.
    pub async fn chat_loop(&self) -> Result<(), SessionError> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        stdout
            .write_all(b"\nstormdesk chat started. Type \"quit\" to exit.\n\n")
            .await?;
        loop {
            stdout.write_all(b"Query: ").await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let query = line.trim();
            if query.eq_ignore_ascii_case("quit") {
                break;
            }
            if query.is_empty() {
                continue;
            }

            let answer = self.process_query(query).await?;
            stdout.write_all(format!("\n{answer}\n").as_bytes()).await?;
            stdout.flush().await?;
        }

        Ok(())
    }
}

/// The tool result goes back to the model as a user message carrying the
/// tool's text blocks verbatim. The server-side error flag is deliberately
/// not inspected; failure text reads the same as success text to the model.
fn tool_result_content(result: &CallToolResult) -> MessageContent {
    let blocks: Vec<ContentBlock> = result
        .content
        .iter()
        .filter_map(|content| {
            content.as_text().map(|text| ContentBlock::Text {
                text: text.to_string(),
            })
        })
        .collect();
    MessageContent::Blocks(blocks)
}
