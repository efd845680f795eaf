// TCP client transport

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::debug;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::{
    connection::Connection,
    message::{Message, QueryRequest, QueryResponse},
    protocol::ProtocolError,
    NetworkError, ResponseStream, Result, Transport,
};

/// Opens one connection per query
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: SocketAddr,
}

impl TcpTransport {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    async fn connect(&self) -> Result<Connection> {
        debug!("connecting to {}", self.addr);
        Ok(Connection::new(TcpStream::connect(self.addr).await?))
    }
}

fn unexpected(message: Message) -> NetworkError {
    ProtocolError::UnexpectedMessage(message.kind().to_string()).into()
}

#[async_trait]
impl Transport for TcpTransport {
    async fn execute(&self, request: QueryRequest) -> Result<QueryResponse> {
        let mut connection = self.connect().await?;
        connection.write_message(&Message::Query(request)).await?;
        let response = match connection.read_message().await? {
            Some(Message::Response(value)) => QueryResponse::Value(value),
            Some(Message::Fault(fault)) => QueryResponse::Fault(fault),
            Some(other) => return Err(unexpected(other)),
            None => return Err(NetworkError::ConnectionClosed),
        };
        connection.write_message(&Message::Terminate).await?;
        Ok(response)
    }

    async fn execute_stream(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream> {
        let mut connection = self.connect().await?;
        connection.write_message(&Message::QueryStream(request)).await?;

        let rows = stream::unfold(Some(connection), move |state| {
            let cancel = cancel.clone();
            async move {
                let mut connection = state?;
                if cancel.is_cancelled() {
                    return None;
                }
                match connection.read_message().await {
                    Ok(Some(Message::Row(value))) => {
                        Some((Ok(QueryResponse::Value(value)), Some(connection)))
                    }
                    Ok(Some(Message::Fault(fault))) => Some((Ok(QueryResponse::Fault(fault)), None)),
                    Ok(Some(Message::EndOfStream)) => {
                        let _ = connection.write_message(&Message::Terminate).await;
                        None
                    }
                    Ok(Some(other)) => Some((Err(unexpected(other)), None)),
                    Ok(None) => Some((Err(NetworkError::ConnectionClosed), None)),
                    Err(e) => Some((Err(e), None)),
                }
            }
        });
        Ok(rows.boxed())
    }
}
