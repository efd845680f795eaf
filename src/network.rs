// Query wire protocol: framing, server, and client transports

pub mod client;
pub mod connection;
pub mod local;
pub mod message;
pub mod protocol;
pub mod server;

// Re-export commonly used types
pub use client::TcpTransport;
pub use connection::Connection;
pub use local::LocalTransport;
pub use message::{Message, QueryRequest, QueryResponse, RemoteFault};
pub use protocol::{ProtocolError, ProtocolHandler};
pub use server::{QueryServer, ServerConfig};

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, NetworkError>;

/// Streamed results: one item per row, a fault item ends the stream
pub type ResponseStream = BoxStream<'static, Result<QueryResponse>>;

/// Carries portable queries to wherever they execute
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: QueryRequest) -> Result<QueryResponse>;

    async fn execute_stream(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream>;
}

// Default query server port
pub const DEFAULT_PORT: u16 = 7070;
