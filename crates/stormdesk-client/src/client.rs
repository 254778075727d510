use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use tower::{Service, ServiceExt}; // for Service::ready()

use stormdesk_core::protocol::{
    CallToolResult, Implementation, InitializeResult, JsonRpcError, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerCapabilities,
    METHOD_NOT_FOUND, PROTOCOL_VERSION,
};

pub type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// Error type for tool-channel client operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] super::transport::Error),

    #[error("RPC error: code={code}, message={message}")]
    Rpc { code: i32, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected response from server: {0}")]
    UnexpectedResponse(String),

    #[error("Not initialized")]
    NotInitialized,

    #[error("Service not ready")]
    NotReady,

    #[error("Request timed out")]
    Timeout(#[from] tower::timeout::error::Elapsed),

    #[error("Error from the tool server: {0}")]
    Boxed(BoxError),

    #[error("Call to the tool server failed for '{method}': {source}")]
    Call {
        method: String,
        #[source]
        source: BoxError,
    },
}

impl From<BoxError> for Error {
    fn from(err: BoxError) -> Self {
        // tower middleware wraps the interesting error in a BoxError
        let err = match err.downcast::<tower::timeout::error::Elapsed>() {
            Ok(elapsed) => return Error::Timeout(*elapsed),
            Err(err) => err,
        };
        match err.downcast::<super::transport::Error>() {
            Ok(transport) => Error::Transport(*transport),
            Err(other) => Error::Boxed(other),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Serialize, Deserialize, Default)]
pub struct ClientCapabilities {
    // the chat client declares no capabilities of its own
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

#[async_trait::async_trait]
pub trait ToolClientTrait: Send + Sync {
    async fn initialize(
        &mut self,
        info: ClientInfo,
        capabilities: ClientCapabilities,
    ) -> Result<InitializeResult, Error>;

    async fn list_tools(&self, next_cursor: Option<String>) -> Result<ListToolsResult, Error>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, Error>;
}

/// JSON-RPC client for the tool channel. Requests are serialized through a
/// tower service and matched to their responses by id.
pub struct ToolClient<S>
where
    S: Service<JsonRpcMessage, Response = JsonRpcMessage> + Clone + Send + Sync + 'static,
    S::Error: Into<Error>,
    S::Future: Send,
{
    service: Mutex<S>,
    next_id: AtomicU64,
    server_capabilities: Option<ServerCapabilities>,
    server_info: Option<Implementation>,
}

impl<S> ToolClient<S>
where
    S: Service<JsonRpcMessage, Response = JsonRpcMessage> + Clone + Send + Sync + 'static,
    S::Error: Into<Error>,
    S::Future: Send,
{
    pub fn new(service: S) -> Self {
        Self {
            service: Mutex::new(service),
            next_id: AtomicU64::new(1),
            server_capabilities: None,
            server_info: None,
        }
    }

    /// Identity the server reported during the handshake.
    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    /// Send a JSON-RPC request and decode the matching response.
    async fn send_request<R>(&self, method: &str, params: Value) -> Result<R, Error>
    where
        R: for<'de> Deserialize<'de>,
    {
        let mut service = self.service.lock().await;
        service.ready().await.map_err(|_| Error::NotReady)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: method.to_string(),
            params: Some(params),
        });

        let reply = service.call(request).await.map_err(|e| Error::Call {
            method: method.to_string(),
            source: Box::new(e.into()),
        })?;

        match reply {
            JsonRpcMessage::Response(JsonRpcResponse {
                id: reply_id,
                result,
                error,
                ..
            }) => {
                if reply_id != Some(id) {
                    return Err(Error::UnexpectedResponse(format!(
                        "response id {reply_id:?} does not match request id {id}"
                    )));
                }
                if let Some(err) = error {
                    Err(Error::Rpc {
                        code: err.code,
                        message: err.message,
                    })
                } else if let Some(result) = result {
                    Ok(serde_json::from_value(result)?)
                } else {
                    Err(Error::UnexpectedResponse("missing result".to_string()))
                }
            }
            JsonRpcMessage::Error(JsonRpcError {
                id: reply_id,
                error,
                ..
            }) => {
                if reply_id != Some(id) {
                    return Err(Error::UnexpectedResponse(format!(
                        "error id {reply_id:?} does not match request id {id}"
                    )));
                }
                Err(Error::Rpc {
                    code: error.code,
                    message: error.message,
                })
            }
            _ => Err(Error::UnexpectedResponse(
                "expected a response frame".to_string(),
            )),
        }
    }

    /// Send a JSON-RPC notification.
    async fn send_notification(&self, method: &str, params: Value) -> Result<(), Error> {
        let mut service = self.service.lock().await;
        service.ready().await.map_err(|_| Error::NotReady)?;

        let notification = JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: Some(params),
        });

        service
            .call(notification)
            .await
            .map_err(|e| Error::Call {
                method: method.to_string(),
                source: Box::new(e.into()),
            })?;

        Ok(())
    }

    fn capabilities(&self) -> Result<&ServerCapabilities, Error> {
        self.server_capabilities
            .as_ref()
            .ok_or(Error::NotInitialized)
    }
}

#[async_trait::async_trait]
impl<S> ToolClientTrait for ToolClient<S>
where
    S: Service<JsonRpcMessage, Response = JsonRpcMessage> + Clone + Send + Sync + 'static,
    S::Error: Into<Error>,
    S::Future: Send,
{
    async fn initialize(
        &mut self,
        info: ClientInfo,
        capabilities: ClientCapabilities,
    ) -> Result<InitializeResult, Error> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info: info,
            capabilities,
        };
        let result: InitializeResult = self
            .send_request("initialize", serde_json::to_value(params)?)
            .await?;

        self.send_notification("notifications/initialized", serde_json::json!({}))
            .await?;

        self.server_capabilities = Some(result.capabilities.clone());
        self.server_info = Some(result.server_info.clone());

        Ok(result)
    }

    async fn list_tools(&self, next_cursor: Option<String>) -> Result<ListToolsResult, Error> {
        // a server without the tools capability simply has no tools
        if self.capabilities()?.tools.is_none() {
            return Ok(ListToolsResult {
                tools: vec![],
                next_cursor: None,
            });
        }

        let params = next_cursor
            .map(|cursor| serde_json::json!({ "cursor": cursor }))
            .unwrap_or_else(|| serde_json::json!({}));

        self.send_request("tools/list", params).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, Error> {
        if self.capabilities()?.tools.is_none() {
            return Err(Error::Rpc {
                code: METHOD_NOT_FOUND,
                message: "Server does not support the 'tools' capability".to_string(),
            });
        }

        let params = serde_json::json!({ "name": name, "arguments": arguments });
        self.send_request("tools/call", params).await
    }
}
