// Query server over TCP

use crate::service::QueryService;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{connection::Connection, protocol::ProtocolHandler, Result, DEFAULT_PORT};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            max_connections: 100,
        }
    }
}

pub struct QueryServer {
    service: Arc<QueryService>,
    config: ServerConfig,
}

impl QueryServer {
    pub fn new(service: Arc<QueryService>, config: ServerConfig) -> Self {
        Self { service, config }
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(TcpListener::bind(self.config.addr).await?)
    }

    /// Bind and serve until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!("Query server listening on {}", listener.local_addr()?);

        // Connection limiter
        let connection_semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        let handler = ProtocolHandler::new(self.service.clone());

        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = shutdown.cancelled() => {
                    info!("Query server shutting down");
                    return Ok(());
                }
            };

            let semaphore = connection_semaphore.clone();
            let handler = handler.clone();

            tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("Failed to acquire connection permit");
                        return;
                    }
                };

                info!("New connection from {}", peer_addr);
                let mut connection = Connection::new(stream);
                if let Err(e) = connection.run(&handler).await {
                    warn!("Connection error from {}: {}", peer_addr, e);
                }
                info!("Connection closed from {}", peer_addr);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::demo;

    #[tokio::test]
    async fn test_server_startup_and_shutdown() {
        let config = ServerConfig {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_connections: 2,
        };
        let server = QueryServer::new(Arc::new(demo::service().unwrap()), config);
        let listener = server.bind().await.unwrap();
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let server_task = tokio::spawn(async move { server.serve(listener, token).await });

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert!(!server_task.is_finished());

        shutdown.cancel();
        assert!(server_task.await.unwrap().is_ok());
    }
}
