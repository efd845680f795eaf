// In-process transport

use crate::service::QueryService;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{
    message::{Message, QueryRequest, QueryResponse},
    protocol::{ProtocolError, ProtocolHandler},
    NetworkError, ResponseStream, Result, Transport,
};

/// Hands requests straight to a service. Messages are still framed and
/// decoded in both directions, so payloads go through the same codec as on
/// the network.
#[derive(Clone)]
pub struct LocalTransport {
    handler: ProtocolHandler,
}

impl LocalTransport {
    pub fn new(service: Arc<QueryService>) -> Self {
        Self {
            handler: ProtocolHandler::new(service),
        }
    }

    fn exchange(&self, message: Message) -> Result<Vec<Message>> {
        let request = through_codec(message)?;
        self.handler
            .handle_message(request)?
            .into_iter()
            .map(through_codec)
            .collect()
    }
}

fn through_codec(message: Message) -> Result<Message> {
    let mut buf = BytesMut::new();
    message.encode(&mut buf)?;
    Message::decode(&mut buf)?.ok_or(NetworkError::ConnectionClosed)
}

fn unexpected(message: &Message) -> NetworkError {
    ProtocolError::UnexpectedMessage(message.kind().to_string()).into()
}

#[async_trait]
impl Transport for LocalTransport {
    async fn execute(&self, request: QueryRequest) -> Result<QueryResponse> {
        match self.exchange(Message::Query(request))?.into_iter().next() {
            Some(Message::Response(value)) => Ok(QueryResponse::Value(value)),
            Some(Message::Fault(fault)) => Ok(QueryResponse::Fault(fault)),
            Some(other) => Err(unexpected(&other)),
            None => Err(NetworkError::ConnectionClosed),
        }
    }

    async fn execute_stream(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream> {
        let mut items = Vec::new();
        for message in self.exchange(Message::QueryStream(request))? {
            match message {
                Message::Row(value) => items.push(Ok(QueryResponse::Value(value))),
                Message::Fault(fault) => items.push(Ok(QueryResponse::Fault(fault))),
                Message::EndOfStream => break,
                other => items.push(Err(unexpected(&other))),
            }
        }
        let rows = stream::iter(items).take_until(cancel.cancelled_owned());
        Ok(rows.boxed())
    }
}
