//! Connection handling for FrameLink
//!
//! Wraps one TCP stream with the framing codec and tracks the
//! request/response exchange running over it.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::protocol::{
    decode_from, read_message, write_message, CodecError, CodecResult, FrameFormat, Message,
    MessageError, Request, Response,
};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Codec error: {0}")]
    Codec(CodecError),

    #[error("Protocol violation: {0}")]
    Message(#[from] MessageError),

    #[error("Connection refused by {0}")]
    ConnectionRefused(SocketAddr),

    #[error("Connection reset by peer")]
    ConnectionReset,

    #[error("Connection closed")]
    Closed,

    #[error("Connection timeout")]
    Timeout,

    #[error("Exchange already in progress (state: {0:?})")]
    RequestInFlight(ExchangeState),

    #[error("No request awaiting a response")]
    NoPendingRequest,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

impl From<CodecError> for ConnectionError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) if is_reset(&e) => ConnectionError::ConnectionReset,
            other => ConnectionError::Codec(other),
        }
    }
}

/// Apply an optional read timeout to a codec read
async fn timed<T>(
    timeout: Option<Duration>,
    read: impl Future<Output = CodecResult<T>>,
) -> ConnectionResult<T> {
    let result = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| ConnectionError::Timeout)?,
        None => read.await,
    };
    Ok(result?)
}

fn is_reset(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

/// Position of a connection within the request/response exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// No exchange in progress
    Idle,
    /// Client is writing its request
    SendingRequest,
    /// Client is waiting for the reply
    AwaitingResponse,
    /// Server is waiting for the next request
    AwaitingRequest,
    /// Server holds a request it has not answered yet
    SendingResponse,
    /// Connection has been closed or failed
    Closed,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

/// Represents one end of a framed connection
pub struct Connection {
    /// Local address
    local_addr: SocketAddr,
    /// Remote peer address
    remote_addr: SocketAddr,
    /// The TCP stream
    stream: TcpStream,
    /// Framing parameters
    format: FrameFormat,
    /// Read timeout (None = wait indefinitely)
    read_timeout: Option<Duration>,
    /// Exchange state
    state: ExchangeState,
    /// Statistics
    stats: ConnectionStats,
}

impl Connection {
    /// Create a new connection from an established TCP stream
    pub fn new(stream: TcpStream, format: FrameFormat) -> io::Result<Self> {
        Ok(Self {
            local_addr: stream.local_addr()?,
            remote_addr: stream.peer_addr()?,
            stream,
            format,
            read_timeout: None,
            state: ExchangeState::Idle,
            stats: ConnectionStats::default(),
        })
    }

    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Get the local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Get the current exchange state
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Send a raw message
    pub async fn send(&mut self, message: &Message) -> ConnectionResult<()> {
        let written = write_message(&mut self.stream, message, self.format).await?;

        self.stats.messages_sent += 1;
        self.stats.bytes_sent += written as u64;

        Ok(())
    }

    /// Receive a raw message (returns None if the peer closed cleanly)
    pub async fn recv(&mut self) -> ConnectionResult<Option<Message>> {
        let message = timed(self.read_timeout, read_message(&mut self.stream, self.format)).await?;
        if let Some(message) = &message {
            self.record_received(message);
        }

        Ok(message)
    }

    fn record_received(&mut self, message: &Message) {
        self.stats.messages_received += 1;
        self.stats.bytes_received += (self.format.header_len() + message.payload.len()) as u64;

        tracing::debug!(
            "Received message type {} ({} bytes) from {}",
            message.msg_type,
            message.payload.len(),
            self.remote_addr
        );
    }

    /// Client side: send one request and wait for its response
    pub async fn request(&mut self, request: &Request) -> ConnectionResult<Response> {
        match self.state {
            ExchangeState::Idle => {}
            ExchangeState::Closed => return Err(ConnectionError::Closed),
            other => return Err(ConnectionError::RequestInFlight(other)),
        }

        // Rejected before any byte is written; the connection stays usable
        let message = request.to_message();
        self.format.check_len(message.payload.len())?;

        let result = self.exchange(&message).await;
        self.state = match result {
            Ok(_) => ExchangeState::Idle,
            Err(_) => ExchangeState::Closed,
        };
        result
    }

    async fn exchange(&mut self, request: &Message) -> ConnectionResult<Response> {
        self.state = ExchangeState::SendingRequest;
        self.send(request).await?;

        // A response is owed, so any end of stream here is a truncation
        self.state = ExchangeState::AwaitingResponse;
        let message = timed(self.read_timeout, decode_from(&mut self.stream, self.format)).await?;
        self.record_received(&message);

        Ok(Response::try_from(&message)?)
    }

    /// Server side: wait for the next request
    ///
    /// Returns Ok(None) once the peer has closed the connection.
    pub async fn next_request(&mut self) -> ConnectionResult<Option<Request>> {
        match self.state {
            ExchangeState::Idle => {}
            ExchangeState::Closed => return Ok(None),
            other => return Err(ConnectionError::RequestInFlight(other)),
        }

        self.state = ExchangeState::AwaitingRequest;
        let result = self.recv_request().await;
        self.state = match result {
            Ok(Some(_)) => ExchangeState::SendingResponse,
            _ => ExchangeState::Closed,
        };
        result
    }

    async fn recv_request(&mut self) -> ConnectionResult<Option<Request>> {
        let Some(message) = self.recv().await? else {
            return Ok(None);
        };

        Ok(Some(Request::try_from(&message)?))
    }

    /// Server side: answer the request returned by the last `next_request`
    pub async fn respond(&mut self, response: &Response) -> ConnectionResult<()> {
        if self.state != ExchangeState::SendingResponse {
            return Err(ConnectionError::NoPendingRequest);
        }

        let message = response.to_message();
        self.format.check_len(message.payload.len())?;

        let result = self.send(&message).await;
        self.state = match result {
            Ok(()) => ExchangeState::Idle,
            Err(_) => ExchangeState::Closed,
        };
        result
    }

    /// Close the connection gracefully
    pub async fn close(&mut self) -> ConnectionResult<()> {
        if self.state == ExchangeState::Closed {
            return Ok(());
        }
        self.state = ExchangeState::Closed;

        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if is_reset(&e) || e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Returns (client, server) ends of a loopback connection
    async fn pair(format: FrameFormat) -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client = Connection::new(client.unwrap(), format).unwrap();
        let server = Connection::new(accepted.unwrap().0, format).unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_request_response_exchange() {
        let (mut client, mut server) = pair(FrameFormat::default()).await;
        assert_eq!(client.remote_addr(), server.local_addr());
        assert_eq!(client.local_addr(), server.remote_addr());

        let server_task = tokio::spawn(async move {
            let request = server.next_request().await.unwrap().unwrap();
            assert_eq!(server.state(), ExchangeState::SendingResponse);
            assert_eq!(
                request,
                Request::NewRegistration {
                    name: "mart".to_string()
                }
            );
            server.respond(&Response::RegistrationOk).await.unwrap();
            assert_eq!(server.state(), ExchangeState::Idle);

            // Peer closes after its one exchange
            assert!(server.next_request().await.unwrap().is_none());
            assert_eq!(server.state(), ExchangeState::Closed);
            server.stats().clone()
        });

        let response = client
            .request(&Request::NewRegistration {
                name: "mart".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(response, Response::RegistrationOk);
        assert_eq!(client.state(), ExchangeState::Idle);
        assert_eq!(client.stats().bytes_sent, 6);
        assert_eq!(client.stats().bytes_received, 2);
        client.close().await.unwrap();

        let server_stats = server_task.await.unwrap();
        assert_eq!(server_stats.messages_received, 1);
        assert_eq!(server_stats.messages_sent, 1);
    }

    #[tokio::test]
    async fn test_respond_without_request() {
        let (_client, mut server) = pair(FrameFormat::default()).await;
        let result = server.respond(&Response::RegistrationOk).await;
        assert!(matches!(result, Err(ConnectionError::NoPendingRequest)));
        assert_eq!(server.stats().messages_sent, 0);
    }

    #[tokio::test]
    async fn test_unknown_request_type_closes() {
        let (mut client, mut server) = pair(FrameFormat::default()).await;

        client.send(&Message::new(99, vec![1, 2, 3])).await.unwrap();

        let result = server.next_request().await;
        assert!(matches!(
            result,
            Err(ConnectionError::Message(MessageError::UnknownMessageType(99)))
        ));
        assert_eq!(server.state(), ExchangeState::Closed);
    }

    #[tokio::test]
    async fn test_peer_closes_before_response() {
        let (mut client, mut server) = pair(FrameFormat::default()).await;

        let server_task = tokio::spawn(async move {
            let _ = server.next_request().await.unwrap();
            server.close().await.unwrap();
        });

        let result = client
            .request(&Request::NewRegistration {
                name: "mart".to_string(),
            })
            .await;
        assert!(matches!(
            result,
            Err(ConnectionError::Codec(CodecError::UnexpectedEndOfStream))
        ));
        assert_eq!(client.state(), ExchangeState::Closed);

        // A closed connection refuses further requests
        let again = client
            .request(&Request::NewRegistration {
                name: "mart".to_string(),
            })
            .await;
        assert!(matches!(again, Err(ConnectionError::Closed)));

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 6];
            stream.read_exact(&mut request).await.unwrap();
            // Header promises 10 bytes, only 3 arrive
            stream.write_all(&[3, 10, b'b', b'a', b'd']).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Connection::new(stream, FrameFormat::default()).unwrap();
        let result = client
            .request(&Request::NewRegistration {
                name: "mart".to_string(),
            })
            .await;
        assert!(matches!(
            result,
            Err(ConnectionError::Codec(CodecError::UnexpectedEndOfStream))
        ));

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (client, _server) = pair(FrameFormat::default()).await;
        let mut client = client.with_read_timeout(Some(Duration::from_millis(50)));

        let result = client.recv().await;
        assert!(matches!(result, Err(ConnectionError::Timeout)));
    }

    #[tokio::test]
    async fn test_oversized_request_rejected_locally() {
        let (mut client, mut server) = pair(FrameFormat::default()).await;

        let result = client
            .request(&Request::NewRegistration {
                name: "x".repeat(256),
            })
            .await;
        assert!(matches!(
            result,
            Err(ConnectionError::Codec(CodecError::PayloadTooLarge { len: 256, max: 255 }))
        ));
        assert_eq!(client.stats().bytes_sent, 0);
        assert_eq!(client.state(), ExchangeState::Idle);

        // Nothing reached the wire, so the next exchange still works
        let server_task = tokio::spawn(async move {
            let request = server.next_request().await.unwrap().unwrap();
            server.respond(&Response::RegistrationOk).await.unwrap();
            request
        });

        let response = client
            .request(&Request::NewRegistration {
                name: "mart".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(response, Response::RegistrationOk);
        assert_eq!(
            server_task.await.unwrap(),
            Request::NewRegistration {
                name: "mart".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_oversized_response_keeps_request_pending() {
        let (mut client, mut server) = pair(FrameFormat::default()).await;

        let request = Request::NewRegistration {
            name: "mart".to_string(),
        };
        client.send(&request.to_message()).await.unwrap();
        server.next_request().await.unwrap().unwrap();

        let result = server
            .respond(&Response::RegistrationError {
                message: "e".repeat(300),
            })
            .await;
        assert!(matches!(
            result,
            Err(ConnectionError::Codec(CodecError::PayloadTooLarge { .. }))
        ));
        assert_eq!(server.state(), ExchangeState::SendingResponse);

        server.respond(&Response::RegistrationOk).await.unwrap();
        assert_eq!(server.state(), ExchangeState::Idle);
        assert_eq!(client.recv().await.unwrap(), Some(Message::empty(2)));
    }
}
