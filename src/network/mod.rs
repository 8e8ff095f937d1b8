//! Network module - Handles TCP communication between client and server
//!
//! Provides:
//! - Server for accepting incoming connections
//! - Client for connecting to the server
//! - Connection wrapping one framed request/response stream

mod client;
mod connection;
mod server;

pub use client::*;
pub use server::*;

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::FrameFormat;

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    pub port: u16,
    /// Interface the server binds to
    pub bind_address: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds (None = wait indefinitely)
    pub read_timeout_ms: Option<u64>,
    /// Framing parameters shared with the peer
    pub frame_format: FrameFormat,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::protocol::DEFAULT_PORT,
            bind_address: "0.0.0.0".to_string(),
            connect_timeout_ms: 5000,
            read_timeout_ms: None,
            frame_format: FrameFormat::default(),
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout_ms: u64) -> Self {
        self.connect_timeout_ms = connect_timeout_ms;
        self
    }

    pub fn with_frame_format(mut self, frame_format: FrameFormat) -> Self {
        self.frame_format = frame_format;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout_ms: Option<u64>) -> Self {
        self.read_timeout_ms = read_timeout_ms;
        self
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Address string the server binds to
    pub fn bind_addr(&self) -> String {
        if self.bind_address.contains(':') && !self.bind_address.starts_with('[') {
            format!("[{}]:{}", self.bind_address, self.port)
        } else {
            format!("{}:{}", self.bind_address, self.port)
        }
    }
}

/// Resolve a hostname to its socket addresses, in resolver order
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
    use tokio::net::lookup_host;

    let addr_string = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    let addrs: Vec<SocketAddr> = lookup_host(&addr_string).await?.collect();

    if addrs.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        ));
    }
    Ok(addrs)
}
