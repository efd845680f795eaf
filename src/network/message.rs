// Query wire protocol messages and framing

use crate::portable::{DynValue, PortableExpr};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{protocol::ProtocolError, NetworkError, Result};

/// Frame header: u32 big-endian length of flags + payload, then the flags byte
pub const HEADER_LEN: usize = 5;

/// Set when the payload carries a fault
pub const FLAG_ERROR: u8 = 0b0000_0001;

/// Frames larger than this are rejected
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub request_id: Uuid,
    pub expression: PortableExpr,
}

impl QueryRequest {
    pub fn new(expression: PortableExpr) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            expression,
        }
    }
}

/// Error raised by the far side while executing a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    pub is_error: bool,
    pub message: String,
}

impl RemoteFault {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            message: message.into(),
        }
    }
}

/// Outcome of a query, or one item of a streamed query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryResponse {
    Value(DynValue),
    Fault(RemoteFault),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    // Client to server
    Query(QueryRequest),
    QueryStream(QueryRequest),
    Terminate,

    // Server to client
    Response(DynValue),
    Row(DynValue),
    EndOfStream,
    Fault(RemoteFault),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Query(_) => "Query",
            Message::QueryStream(_) => "QueryStream",
            Message::Terminate => "Terminate",
            Message::Response(_) => "Response",
            Message::Row(_) => "Row",
            Message::EndOfStream => "EndOfStream",
            Message::Fault(_) => "Fault",
        }
    }

    fn flags(&self) -> u8 {
        match self {
            Message::Fault(_) => FLAG_ERROR,
            _ => 0,
        }
    }

    /// Append one frame to `buf`
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let payload = bincode::serialize(self).map_err(ProtocolError::from)?;
        if payload.len() + 1 > MAX_FRAME_LEN {
            return Err(NetworkError::InvalidMessage(format!(
                "Frame of {} bytes exceeds the limit",
                payload.len() + 1
            )));
        }
        buf.reserve(HEADER_LEN + payload.len());
        buf.put_u32((payload.len() + 1) as u32);
        buf.put_u8(self.flags());
        buf.put_slice(&payload);
        Ok(())
    }

    /// Take one complete frame off the front of `buf`, if there is one
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if length == 0 || length > MAX_FRAME_LEN {
            return Err(NetworkError::InvalidMessage(format!(
                "Invalid frame length: {}",
                length
            )));
        }
        if buf.len() < 4 + length {
            return Ok(None);
        }

        buf.advance(4);
        let flags = buf.get_u8();
        let payload = buf.split_to(length - 1);
        let message: Message = bincode::deserialize(&payload).map_err(ProtocolError::from)?;

        if (flags & FLAG_ERROR != 0) != matches!(message, Message::Fault(_)) {
            return Err(NetworkError::InvalidMessage(format!(
                "Error flag does not match {} payload",
                message.kind()
            )));
        }
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portable::{PortableConstant, Primitive, TypeRef};

    fn request() -> QueryRequest {
        QueryRequest::new(PortableExpr::Constant(PortableConstant {
            declared_type: TypeRef::named("string"),
            concrete_type: None,
            value: DynValue::Primitive(Primitive::String("Berlin".to_string())),
        }))
    }

    #[test]
    fn test_message_encoding() {
        let mut buf = BytesMut::new();
        let message = Message::Query(request());
        message.encode(&mut buf).unwrap();

        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(length + 4, buf.len());
        assert_eq!(buf[4], 0);

        let decoded = Message::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, message);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_fault_sets_error_flag() {
        let mut buf = BytesMut::new();
        Message::Fault(RemoteFault::error("not found"))
            .encode(&mut buf)
            .unwrap();
        assert_eq!(buf[4] & FLAG_ERROR, FLAG_ERROR);
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut full = BytesMut::new();
        Message::Row(DynValue::Null).encode(&mut full).unwrap();
        Message::EndOfStream.encode(&mut full).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full[..3]);
        assert!(Message::decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[3..]);
        assert_eq!(
            Message::decode(&mut buf).unwrap(),
            Some(Message::Row(DynValue::Null))
        );
        assert_eq!(Message::decode(&mut buf).unwrap(), Some(Message::EndOfStream));
        assert!(Message::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_mismatched_flag_is_rejected() {
        let mut buf = BytesMut::new();
        Message::EndOfStream.encode(&mut buf).unwrap();
        buf[4] = FLAG_ERROR;
        assert!(matches!(
            Message::decode(&mut buf),
            Err(NetworkError::InvalidMessage(_))
        ));
    }
}
