//! FrameLink Server
//!
//! Accepts connections one at a time and answers registration requests.

use std::future::Future;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

use super::connection::{Connection, ConnectionError};
use super::NetworkConfig;
use crate::protocol::{Request, Response};
use crate::registry::Registry;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// What happened over the lifetime of one served connection
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    /// Names accepted during the session
    pub registered: Vec<String>,
    /// Number of rejected registrations
    pub rejected: usize,
    /// Why the session ended
    pub close_reason: String,
}

/// FrameLink Server
pub struct Server {
    /// Server configuration
    config: NetworkConfig,
    /// Bound listener
    listener: TcpListener,
    /// Registered names
    registry: Registry,
}

impl Server {
    /// Bind the listening socket
    pub async fn bind(config: NetworkConfig) -> ServerResult<Self> {
        let bind_addr = config.bind_addr();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        tracing::info!(
            "Server listening on {} ({} length field)",
            listener.local_addr()?,
            config.frame_format.width()
        );

        Ok(Self {
            config,
            listener,
            registry: Registry::new(),
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Wait for the next client
    pub async fn accept(&self) -> ServerResult<Connection> {
        let (stream, addr) = self.listener.accept().await?;
        tracing::info!("New connection from {}", addr);

        let conn = Connection::new(stream, self.config.frame_format)?
            .with_read_timeout(self.config.read_timeout());
        Ok(conn)
    }

    /// Accept a single client and serve it until it disconnects
    pub async fn serve_one(&mut self) -> ServerResult<SessionSummary> {
        let conn = self.accept().await?;
        Ok(self.serve_connection(conn).await)
    }

    /// Serve clients one after another until `shutdown` completes
    pub async fn run<F>(&mut self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let conn = tokio::select! {
                result = self.accept() => match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        continue;
                    }
                },
                _ = &mut shutdown => {
                    tracing::info!("Server shutdown requested");
                    break;
                }
            };

            tokio::select! {
                summary = self.serve_connection(conn) => {
                    tracing::debug!("Session summary: {:?}", summary);
                }
                _ = &mut shutdown => {
                    tracing::info!("Server shutdown requested");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Answer requests on one connection until it closes or misbehaves
    pub async fn serve_connection(&mut self, mut conn: Connection) -> SessionSummary {
        let addr = conn.remote_addr();
        let max_payload = self.config.frame_format.max_payload();
        let mut registered = Vec::new();
        let mut rejected = 0;

        let close_reason = loop {
            match conn.next_request().await {
                Ok(Some(Request::NewRegistration { name })) => {
                    let response = match self.registry.register(&name) {
                        Ok(stored) => {
                            tracing::info!("Registered '{}' from {}", stored, addr);
                            registered.push(stored);
                            Response::RegistrationOk
                        }
                        Err(e) => {
                            tracing::info!("Rejected registration from {}: {}", addr, e);
                            rejected += 1;
                            Response::RegistrationError {
                                message: truncate_to(&e.to_string(), max_payload).to_string(),
                            }
                        }
                    };

                    if let Err(e) = conn.respond(&response).await {
                        tracing::warn!("Failed to reply to {}: {}", addr, e);
                        break format!("Send error: {}", e);
                    }
                }
                Ok(None) => {
                    break "Connection closed".to_string();
                }
                Err(ConnectionError::Message(e)) => {
                    tracing::warn!("Protocol violation from {}, closing: {}", addr, e);
                    break format!("Protocol violation: {}", e);
                }
                Err(e) => {
                    tracing::warn!("Connection to {} failed: {}", addr, e);
                    break format!("Error: {}", e);
                }
            }
        };

        if let Err(e) = conn.close().await {
            tracing::debug!("Close error for {}: {}", addr, e);
        }

        tracing::info!(
            "Client {} disconnected: {} ({} sent, {} received)",
            addr,
            close_reason,
            conn.stats().messages_sent,
            conn.stats().messages_received
        );

        SessionSummary {
            registered,
            rejected,
            close_reason,
        }
    }
}

/// Cut `text` to at most `max` bytes on a char boundary
fn truncate_to(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }

    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
