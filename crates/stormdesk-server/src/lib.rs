use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use pin_project::pin_project;
use stormdesk_core::protocol::{
    ErrorData, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR,
    INVALID_REQUEST, PARSE_ERROR,
};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tower_service::Service;

mod errors;
pub use errors::{BoxError, RouterError, ServerError, TransportError};

pub mod router;
pub use router::{CapabilitiesBuilder, Router, RouterService, ToolRouter};

pub mod tools;

/// Newline-delimited JSON-RPC frames over a pair of byte streams.
///
/// Reading yields one [`JsonRpcMessage`] per line; a line that is not valid
/// UTF-8, not valid JSON, not a JSON object, or not a `"jsonrpc": "2.0"`
/// frame surfaces as a [`TransportError`] instead of ending the stream.
#[pin_project]
pub struct ByteTransport<R, W> {
    #[pin]
    reader: BufReader<R>,
    #[pin]
    writer: W,
    // Partial line carried across polls until the newline shows up
    line: Vec<u8>,
}

impl<R, W> ByteTransport<R, W>
where
    R: AsyncRead,
    W: AsyncWrite,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            // Tool results can be large; a 2MB buffer keeps a whole frame
            // readable in one refill for everything the tools produce
            reader: BufReader::with_capacity(2 * 1024 * 1024, reader),
            writer,
            line: Vec::new(),
        }
    }
}

fn parse_frame(bytes: Vec<u8>) -> Result<JsonRpcMessage, TransportError> {
    let line = String::from_utf8(bytes)?;
    // Log before parsing so truncated chunks that never become valid JSON
    // still show up in the trace
    tracing::debug!(frame = %line.trim_end(), "inbound frame");

    let value: serde_json::Value = serde_json::from_str(&line)?;
    let Some(object) = value.as_object() else {
        return Err(TransportError::InvalidMessage(
            "Message must be a JSON object".into(),
        ));
    };
    if object.get("jsonrpc").and_then(serde_json::Value::as_str) != Some("2.0") {
        return Err(TransportError::Protocol(
            "Missing or invalid jsonrpc version".into(),
        ));
    }

    Ok(serde_json::from_value(value)?)
}

impl<R, W> Stream for ByteTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    type Item = Result<JsonRpcMessage, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            let (consumed, complete) = {
                let buf = match this.reader.as_mut().poll_fill_buf(cx) {
                    Poll::Ready(Ok(buf)) => buf,
                    Poll::Ready(Err(e)) => {
                        return Poll::Ready(Some(Err(TransportError::Io(e))));
                    }
                    Poll::Pending => return Poll::Pending,
                };

                if buf.is_empty() {
                    // EOF. An unterminated trailing line still counts as a frame.
                    if this.line.is_empty() {
                        return Poll::Ready(None);
                    }
                    let line = std::mem::take(this.line);
                    return Poll::Ready(Some(parse_frame(line)));
                }

                match buf.iter().position(|&b| b == b'\n') {
                    Some(newline) => {
                        this.line.extend_from_slice(&buf[..newline]);
                        (newline + 1, true)
                    }
                    None => {
                        this.line.extend_from_slice(buf);
                        (buf.len(), false)
                    }
                }
            };

            this.reader.as_mut().consume(consumed);
            if complete {
                let line = std::mem::take(this.line);
                return Poll::Ready(Some(parse_frame(line)));
            }
        }
    }
}

impl<R, W> ByteTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Serialize one message onto the writer, newline-terminated, and flush.
    pub async fn write_message(
        self: &mut Pin<&mut Self>,
        msg: JsonRpcMessage,
    ) -> Result<(), std::io::Error> {
        let json = serde_json::to_string(&msg)?;

        let mut this = self.as_mut().project();
        this.writer.write_all(json.as_bytes()).await?;
        this.writer.write_all(b"\n").await?;
        this.writer.flush().await?;

        Ok(())
    }
}

/// Drives a JSON-RPC service over a byte transport until the peer hangs up.
///
/// Only requests get replies. Notifications are absorbed, and stray
/// responses or acks on the inbound side are dropped.
pub struct Server<S> {
    service: S,
}

impl<S> Server<S>
where
    S: Service<JsonRpcRequest, Response = JsonRpcResponse> + Send,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub async fn run<R, W>(self, mut transport: ByteTransport<R, W>) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        use futures::StreamExt;
        let mut service = self.service;
        let mut transport = Pin::new(&mut transport);

        tracing::info!("tool server listening");
        while let Some(inbound) = transport.next().await {
            match inbound {
                Ok(JsonRpcMessage::Request(request)) => {
                    let id = request.id;
                    let method = request.method.clone();
                    tracing::info!(request_id = ?id, %method, "request received");

                    let response = match service.call(request).await {
                        Ok(response) => response,
                        Err(error) => {
                            let message = error.into().to_string();
                            tracing::error!(request_id = ?id, %method, error = %message, "request failed");
                            JsonRpcResponse {
                                jsonrpc: "2.0".to_string(),
                                id,
                                result: None,
                                error: Some(ErrorData {
                                    code: INTERNAL_ERROR,
                                    message,
                                    data: None,
                                }),
                            }
                        }
                    };

                    tracing::debug!(response_id = ?response.id, "sending response");
                    transport
                        .write_message(JsonRpcMessage::Response(response))
                        .await
                        .map_err(|e| ServerError::Transport(TransportError::Io(e)))?;
                }
                Ok(other) => {
                    tracing::debug!(frame = ?other, "ignoring non-request frame");
                }
                Err(error) => {
                    tracing::warn!(%error, "bad inbound frame");
                    let code = match &error {
                        TransportError::Json(_) | TransportError::InvalidMessage(_) => PARSE_ERROR,
                        TransportError::Protocol(_) => INVALID_REQUEST,
                        _ => INTERNAL_ERROR,
                    };
                    // A frame that failed to parse has no usable id to echo back
                    let frame = JsonRpcMessage::Error(JsonRpcError {
                        jsonrpc: "2.0".to_string(),
                        id: None,
                        error: ErrorData {
                            code,
                            message: error.to_string(),
                            data: None,
                        },
                    });
                    transport
                        .write_message(frame)
                        .await
                        .map_err(|e| ServerError::Transport(TransportError::Io(e)))?;
                }
            }
        }

        tracing::info!("input closed, shutting down");
        Ok(())
    }
}
