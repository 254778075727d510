use async_trait::async_trait;
use std::collections::HashMap;
use stormdesk_core::protocol::JsonRpcMessage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};

pub type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// A generic error type for transport operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport was not connected or is already closed")]
    NotConnected,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Only requests and notifications can be sent on the tool channel")]
    UnsupportedMessage,

    #[error("Tool server process error: {0}")]
    Process(String),
}

/// A message handed to the transport actor for delivery.
#[derive(Debug)]
pub struct TransportMessage {
    /// The JSON-RPC message to send
    pub message: JsonRpcMessage,
    /// Channel to receive the response on (None for notifications)
    pub response_tx: Option<oneshot::Sender<Result<JsonRpcMessage, Error>>>,
}

/// An asynchronous transport with channel-based communication.
#[async_trait]
pub trait Transport {
    type Handle: TransportHandle;

    /// Start the transport and establish the underlying connection.
    /// Returns the transport handle for sending messages.
    async fn start(&self) -> Result<Self::Handle, Error>;

    /// Close the transport and free any resources.
    async fn close(&self) -> Result<(), Error>;
}

#[async_trait]
pub trait TransportHandle: Send + Sync + Clone + 'static {
    async fn send(&self, message: JsonRpcMessage) -> Result<JsonRpcMessage, Error>;
}

/// Common send path: requests wait on a oneshot for their response,
/// notifications resolve immediately with `Nil`.
pub async fn send_message(
    sender: &mpsc::Sender<TransportMessage>,
    message: JsonRpcMessage,
) -> Result<JsonRpcMessage, Error> {
    match message {
        JsonRpcMessage::Request(request) => {
            let (respond_to, response) = oneshot::channel();
            let envelope = TransportMessage {
                message: JsonRpcMessage::Request(request),
                response_tx: Some(respond_to),
            };
            sender
                .send(envelope)
                .await
                .map_err(|_| Error::ChannelClosed)?;
            response.await.map_err(|_| Error::ChannelClosed)?
        }
        JsonRpcMessage::Notification(notification) => {
            let envelope = TransportMessage {
                message: JsonRpcMessage::Notification(notification),
                response_tx: None,
            };
            sender
                .send(envelope)
                .await
                .map_err(|_| Error::ChannelClosed)?;
            Ok(JsonRpcMessage::Nil)
        }
        _ => Err(Error::UnsupportedMessage),
    }
}

/// In-flight requests waiting for a response, keyed by request id.
pub struct PendingRequests {
    requests: Mutex<HashMap<u64, oneshot::Sender<Result<JsonRpcMessage, Error>>>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, id: u64, sender: oneshot::Sender<Result<JsonRpcMessage, Error>>) {
        self.requests.lock().await.insert(id, sender);
    }

    pub async fn respond(&self, id: u64, response: Result<JsonRpcMessage, Error>) {
        if let Some(tx) = self.requests.lock().await.remove(&id) {
            let _ = tx.send(response);
        }
    }

    pub async fn clear(&self) {
        self.requests.lock().await.clear();
    }
}

pub mod stdio;
pub use stdio::StdioTransport;
