//! FrameLink Client
//!
//! Connects to a FrameLink server and performs registration exchanges.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;

use super::connection::{Connection, ConnectionError, ExchangeState};
use super::NetworkConfig;
use crate::protocol::{Request, Response};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Connection timeout")]
    Timeout,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Result of a registration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Server accepted the name
    Accepted,
    /// Server rejected the name with a reason
    Rejected(String),
}

/// FrameLink Client
pub struct Client {
    /// Client configuration
    config: NetworkConfig,
    /// Active connection, if any
    connection: Option<Connection>,
}

impl Client {
    /// Create a new client
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    /// Connect to a server by address
    pub async fn connect(&mut self, server_addr: SocketAddr) -> ClientResult<()> {
        if self.connection.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        tracing::info!("Connecting to {}", server_addr);

        // Connect with timeout
        let stream = match tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            TcpStream::connect(server_addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(ConnectionError::ConnectionRefused(server_addr).into());
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                return Err(ConnectionError::ConnectionReset.into());
            }
            Ok(Err(e)) => return Err(ClientError::Io(e)),
            Err(_) => return Err(ClientError::Timeout),
        };

        let conn = Connection::new(stream, self.config.frame_format)?
            .with_read_timeout(self.config.read_timeout());
        tracing::info!("Connected to {} from {}", conn.remote_addr(), conn.local_addr());

        self.connection = Some(conn);
        Ok(())
    }

    /// Connect to a server by hostname
    ///
    /// Each resolved address is tried in turn; the last failure is returned.
    pub async fn connect_hostname(&mut self, hostname: &str, port: u16) -> ClientResult<()> {
        let mut last_err = ClientError::NotConnected;

        for addr in super::resolve_host(hostname, port).await? {
            match self.connect(addr).await {
                Ok(()) => return Ok(()),
                Err(ClientError::AlreadyConnected) => return Err(ClientError::AlreadyConnected),
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// Register a name and wait for the server's verdict
    pub async fn register(&mut self, name: &str) -> ClientResult<RegistrationOutcome> {
        let conn = self.connection.as_mut().ok_or(ClientError::NotConnected)?;

        let request = Request::NewRegistration {
            name: name.to_string(),
        };
        tracing::debug!("Sending registration for '{}'", name);

        let result = conn.request(&request).await;
        let outcome = match result {
            Ok(Response::RegistrationOk) => RegistrationOutcome::Accepted,
            Ok(Response::RegistrationError { message }) => RegistrationOutcome::Rejected(message),
            Err(e) => {
                // Only a failed exchange leaves the connection unusable
                if conn.state() == ExchangeState::Closed {
                    self.connection = None;
                }
                return Err(e.into());
            }
        };

        Ok(outcome)
    }

    /// Disconnect from the server
    pub async fn close(&mut self) -> ClientResult<()> {
        let mut conn = self.connection.take().ok_or(ClientError::NotConnected)?;
        conn.close().await?;
        tracing::info!("Disconnected from {}", conn.remote_addr());
        Ok(())
    }

    /// Address of the connected server
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.connection.as_ref().map(Connection::remote_addr)
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Server;
    use crate::protocol::{CodecError, FrameFormat, LengthWidth};
    use tokio::net::TcpListener;

    fn loopback_config() -> NetworkConfig {
        NetworkConfig::new(0).with_bind_address("127.0.0.1")
    }

    #[test]
    fn test_client_creation() {
        let client = Client::new(NetworkConfig::default());
        assert!(!client.is_connected());
        assert!(client.server_addr().is_none());
    }

    #[tokio::test]
    async fn test_register_without_connection() {
        let mut client = Client::new(NetworkConfig::default());
        assert!(matches!(
            client.register("mart").await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(client.close().await, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Grab a free port, then release it so nothing listens there
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = Client::new(NetworkConfig::default());
        let result = client.connect(addr).await;
        assert!(matches!(
            result,
            Err(ClientError::Connection(ConnectionError::ConnectionRefused(a))) if a == addr
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_registration_end_to_end() {
        let mut server = Server::bind(loopback_config()).await.unwrap();
        let addr = server.local_addr().unwrap();

        let server_task = tokio::spawn(async move { server.serve_one().await.unwrap() });

        let mut client = Client::new(NetworkConfig::default());
        client.connect_hostname("127.0.0.1", addr.port()).await.unwrap();
        assert_eq!(client.server_addr(), Some(addr));
        assert!(matches!(
            client.connect(addr).await,
            Err(ClientError::AlreadyConnected)
        ));

        assert_eq!(
            client.register("mart").await.unwrap(),
            RegistrationOutcome::Accepted
        );
        assert_eq!(
            client.register("mart").await.unwrap(),
            RegistrationOutcome::Rejected("name already registered: mart".to_string())
        );
        client.close().await.unwrap();

        let summary = server_task.await.unwrap();
        assert_eq!(summary.registered, vec!["mart".to_string()]);
        assert_eq!(summary.rejected, 1);
    }

    #[tokio::test]
    async fn test_wide_length_field_end_to_end() {
        let format = FrameFormat::new(LengthWidth::U16);
        let mut server = Server::bind(loopback_config().with_frame_format(format))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let server_task = tokio::spawn(async move { server.serve_one().await.unwrap() });

        // Longer than a one-byte length field allows
        let long_name = "n".repeat(300);

        let mut client = Client::new(NetworkConfig::default().with_frame_format(format));
        client.connect(addr).await.unwrap();
        assert_eq!(
            client.register(&long_name).await.unwrap(),
            RegistrationOutcome::Accepted
        );
        client.close().await.unwrap();

        let summary = server_task.await.unwrap();
        assert_eq!(summary.registered, vec![long_name]);
    }

    #[tokio::test]
    async fn test_oversized_name_keeps_connection() {
        let mut server = Server::bind(loopback_config()).await.unwrap();
        let addr = server.local_addr().unwrap();

        let server_task = tokio::spawn(async move { server.serve_one().await.unwrap() });

        let mut client = Client::new(NetworkConfig::default());
        client.connect(addr).await.unwrap();

        let result = client.register(&"x".repeat(256)).await;
        assert!(matches!(
            result,
            Err(ClientError::Connection(ConnectionError::Codec(
                CodecError::PayloadTooLarge { len: 256, max: 255 }
            )))
        ));
        assert!(client.is_connected());

        assert_eq!(
            client.register("mart").await.unwrap(),
            RegistrationOutcome::Accepted
        );
        client.close().await.unwrap();

        let summary = server_task.await.unwrap();
        assert_eq!(summary.registered, vec!["mart".to_string()]);
    }
}
