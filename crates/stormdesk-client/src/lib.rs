pub mod client;
pub mod model;
pub mod service;
pub mod session;
pub mod transport;

pub use client::{ClientCapabilities, ClientInfo, Error, ToolClient, ToolClientTrait};
pub use model::{AnthropicClient, ModelApi};
pub use service::RpcService;
pub use session::{ChatSession, SessionConfig, SessionError};
pub use transport::{StdioTransport, Transport, TransportHandle};
