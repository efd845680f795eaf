// Framed message connection over TCP

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{message::Message, protocol::ProtocolHandler, NetworkError, Result};

pub struct Connection {
    stream: TcpStream,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buffer: BytesMut::with_capacity(8192),
            write_buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Read the next message; `None` when the peer closed between frames
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(message) = Message::decode(&mut self.read_buffer)? {
                return Ok(Some(message));
            }
            let n = self.stream.read_buf(&mut self.read_buffer).await?;
            if n == 0 {
                if self.read_buffer.is_empty() {
                    return Ok(None);
                }
                return Err(NetworkError::ConnectionClosed);
            }
        }
    }

    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        self.write_buffer.clear();
        message.encode(&mut self.write_buffer)?;
        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Serve requests until the client terminates or disconnects
    pub async fn run(&mut self, handler: &ProtocolHandler) -> Result<()> {
        while let Some(message) = self.read_message().await? {
            if message == Message::Terminate {
                return Ok(());
            }
            for response in handler.handle_message(message)? {
                self.write_message(&response).await?;
            }
        }
        Ok(())
    }
}
