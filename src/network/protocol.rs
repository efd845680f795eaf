// Server-side handling of query messages

use crate::portable::DynValue;
use crate::service::QueryService;
use log::{debug, warn};
use std::sync::Arc;
use thiserror::Error;

use super::message::{Message, QueryRequest, RemoteFault};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unexpected message type: {0}")]
    UnexpectedMessage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Turns client messages into response messages
#[derive(Clone)]
pub struct ProtocolHandler {
    service: Arc<QueryService>,
}

impl ProtocolHandler {
    pub fn new(service: Arc<QueryService>) -> Self {
        Self { service }
    }

    pub fn handle_message(&self, message: Message) -> Result<Vec<Message>, ProtocolError> {
        match message {
            Message::Query(request) => Ok(vec![match self.execute(&request) {
                Ok(value) => Message::Response(value),
                Err(fault) => Message::Fault(fault),
            }]),
            Message::QueryStream(request) => Ok(match self.execute(&request) {
                Ok(DynValue::List(rows)) => rows
                    .into_iter()
                    .map(Message::Row)
                    .chain(std::iter::once(Message::EndOfStream))
                    .collect(),
                Ok(value) => vec![Message::Row(value), Message::EndOfStream],
                Err(fault) => vec![Message::Fault(fault)],
            }),
            other => Err(ProtocolError::UnexpectedMessage(other.kind().to_string())),
        }
    }

    fn execute(&self, request: &QueryRequest) -> Result<DynValue, RemoteFault> {
        debug!("executing request {}", request.request_id);
        self.service.execute(&request.expression).map_err(|fault| {
            warn!("request {} faulted: {}", request.request_id, fault.message);
            fault
        })
    }
}
