use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use serde_json::Value;
use stormdesk_core::{
    content::Content,
    handler::{ToolError, ToolHandler},
    protocol::{
        CallToolResult, Implementation, InitializeResult, JsonRpcRequest, JsonRpcResponse,
        ListToolsResult, ServerCapabilities, ToolsCapability, PROTOCOL_VERSION,
    },
    tool::Tool,
};
use tower_service::Service;

use crate::{BoxError, RouterError};

/// Builder for the capability set advertised during `initialize`.
pub struct CapabilitiesBuilder {
    tools: Option<ToolsCapability>,
}

impl Default for CapabilitiesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilitiesBuilder {
    pub fn new() -> Self {
        Self { tools: None }
    }

    /// Advertise the tools capability.
    pub fn with_tools(mut self, list_changed: bool) -> Self {
        self.tools = Some(ToolsCapability {
            list_changed: Some(list_changed),
        });
        self
    }

    pub fn build(self) -> ServerCapabilities {
        ServerCapabilities { tools: self.tools }
    }
}

pub trait Router: Send + Sync + 'static {
    fn name(&self) -> String;
    // instructions are optional in the handshake result, required of routers
    fn instructions(&self) -> String;
    fn capabilities(&self) -> ServerCapabilities;
    fn list_tools(&self) -> Vec<Tool>;
    fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Content>, ToolError>> + Send + 'static>>;

    // Helper method to create base response
    fn create_response(&self, id: Option<u64>) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: None,
        }
    }

    fn handle_initialize(
        &self,
        req: JsonRpcRequest,
    ) -> impl Future<Output = Result<JsonRpcResponse, RouterError>> + Send {
        async move {
            let result = InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: self.capabilities(),
                server_info: Implementation {
                    name: self.name(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                instructions: Some(self.instructions()),
            };

            let mut response = self.create_response(req.id);
            response.result =
                Some(serde_json::to_value(result).map_err(|e| {
                    RouterError::Internal(format!("JSON serialization error: {}", e))
                })?);

            Ok(response)
        }
    }

    fn handle_tools_list(
        &self,
        req: JsonRpcRequest,
    ) -> impl Future<Output = Result<JsonRpcResponse, RouterError>> + Send {
        async move {
            let result = ListToolsResult {
                tools: self.list_tools(),
                next_cursor: None,
            };

            let mut response = self.create_response(req.id);
            response.result =
                Some(serde_json::to_value(result).map_err(|e| {
                    RouterError::Internal(format!("JSON serialization error: {}", e))
                })?);

            Ok(response)
        }
    }

    fn handle_tools_call(
        &self,
        req: JsonRpcRequest,
    ) -> impl Future<Output = Result<JsonRpcResponse, RouterError>> + Send {
        async move {
            let params = req
                .params
                .ok_or_else(|| RouterError::InvalidParams("Missing parameters".into()))?;

            let name = params
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| RouterError::InvalidParams("Missing tool name".into()))?;

            let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

            tracing::info!(tool = %name, "executing tool");
            // Handler failures surface as failure text in the result, not as
            // protocol-level errors
            let result = match self.call_tool(name, arguments).await {
                Ok(content) => CallToolResult {
                    content,
                    is_error: None,
                },
                Err(err) => {
                    tracing::warn!(tool = %name, error = %err, "tool failed");
                    CallToolResult {
                        content: vec![Content::text(err.to_string())],
                        is_error: Some(true),
                    }
                }
            };

            let mut response = self.create_response(req.id);
            response.result =
                Some(serde_json::to_value(result).map_err(|e| {
                    RouterError::Internal(format!("JSON serialization error: {}", e))
                })?);

            Ok(response)
        }
    }
}

/// A [`Router`] over a set of registered tool handlers.
///
/// Tools are listed in registration order and dispatched by name.
#[derive(Clone)]
pub struct ToolRouter {
    name: String,
    instructions: String,
    tools: Vec<Arc<dyn ToolHandler>>,
}

impl ToolRouter {
    pub fn new<N, I>(name: N, instructions: I) -> Self
    where
        N: Into<String>,
        I: Into<String>,
    {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            tools: Vec::new(),
        }
    }

    /// Register a tool. Names must be unique; a duplicate is a wiring bug.
    pub fn with_tool(mut self, handler: Arc<dyn ToolHandler>) -> Result<Self, RouterError> {
        if self.tools.iter().any(|tool| tool.name() == handler.name()) {
            return Err(RouterError::Internal(format!(
                "duplicate tool registration: {}",
                handler.name()
            )));
        }
        self.tools.push(handler);
        Ok(self)
    }
}

impl Router for ToolRouter {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn instructions(&self) -> String {
        self.instructions.clone()
    }

    fn capabilities(&self) -> ServerCapabilities {
        CapabilitiesBuilder::new().with_tools(false).build()
    }

    fn list_tools(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .map(|handler| Tool::new(handler.name(), handler.description(), handler.schema()))
            .collect()
    }

    fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Content>, ToolError>> + Send + 'static>> {
        let handler = self
            .tools
            .iter()
            .find(|handler| handler.name() == tool_name)
            .cloned();
        let tool_name = tool_name.to_string();

        Box::pin(async move {
            match handler {
                Some(handler) => handler.call(arguments).await,
                None => Err(ToolError::NotFound(tool_name)),
            }
        })
    }
}

pub struct RouterService<T>(pub T);

impl<T> Service<JsonRpcRequest> for RouterService<T>
where
    T: Router + Clone + Send + Sync + 'static,
{
    type Response = JsonRpcResponse;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: JsonRpcRequest) -> Self::Future {
        let this = self.0.clone();

        Box::pin(async move {
            let result = match req.method.as_str() {
                "initialize" => this.handle_initialize(req).await,
                "tools/list" => this.handle_tools_list(req).await,
                "tools/call" => this.handle_tools_call(req).await,
                _ => {
                    let mut response = this.create_response(req.id);
                    response.error = Some(RouterError::MethodNotFound(req.method).into());
                    Ok(response)
                }
            };

            result.map_err(BoxError::from)
        })
    }
}
