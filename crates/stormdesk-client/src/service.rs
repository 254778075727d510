use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use stormdesk_core::protocol::JsonRpcMessage;
use tower::{timeout::Timeout, Service, ServiceBuilder};

use crate::transport::{Error, TransportHandle};

/// Tower `Service` facade over a transport handle, so middleware can be
/// layered onto the tool channel when a caller wants it.
#[derive(Clone)]
pub struct RpcService<T: TransportHandle> {
    transport: Arc<T>,
}

impl<T: TransportHandle> RpcService<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }
}

impl<T> Service<JsonRpcMessage> for RpcService<T>
where
    T: TransportHandle + Send + Sync + 'static,
{
    type Response = JsonRpcMessage;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // the channel into the transport actor accepts messages while it is open
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, message: JsonRpcMessage) -> Self::Future {
        let transport = Arc::clone(&self.transport);
        Box::pin(async move { transport.send(message).await })
    }
}

impl<T> RpcService<T>
where
    T: TransportHandle,
{
    /// Layer a tower timeout onto the service. The chat path calls tools
    /// without one; hosts that want a deadline on every RPC can opt in here.
    pub fn with_timeout(transport: T, timeout: std::time::Duration) -> Timeout<RpcService<T>> {
        ServiceBuilder::new()
            .timeout(timeout)
            .service(RpcService::new(transport))
    }
}
