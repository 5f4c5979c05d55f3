//! Byte source adapters
//!
//! An adapter opens a byte-oriented connection and hands back independent
//! reader and writer halves, so the session's read loop never blocks writes.
//!
//! Supports:
//! - Serial ports (RS-232, USB-Serial) through tokio-serial
//! - In-memory loopback links for tests and demos

mod memory;
mod serial;

pub use memory::{MemoryDevice, MemoryTransport};
pub use serial::{list_ports, SerialOptions, SerialFlowControl, SerialParity, SerialTransport};

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Reader half of an open link
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Writer half of an open link
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open connection split into halves
pub struct Link {
    /// Inbound bytes
    pub reader: BoxedReader,
    /// Outbound bytes
    pub writer: BoxedWriter,
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Serial port
    Serial,
    /// In-memory link
    Memory,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Memory => write!(f, "Memory"),
        }
    }
}

/// Errors raised while opening a connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// A session is already active, or the port is held by another process
    #[error("Port busy: {0}")]
    Busy(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    Denied(String),

    /// Unsupported environment or settings
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Port not found
    #[error("Port not found: {0}")]
    NotFound(String),

    /// Any other open failure
    #[error("Connection failed: {0}")]
    Failed(String),
}

/// Errors raised by an open link
#[derive(Error, Debug)]
pub enum TransportError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Adapter over a byte-oriented hardware connection
#[async_trait]
pub trait TransportTrait: Send + Sync {
    /// Open the connection and split it into halves
    async fn open(&mut self, options: &SerialOptions) -> Result<Link, ConnectionError>;

    /// Release adapter-side resources after both halves are dropped
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Get connection info string
    fn connection_info(&self) -> String;
}

/// Create a serial adapter for a port name (e.g. `COM3`, `/dev/ttyUSB0`)
pub fn create_transport(port: &str) -> Result<Box<dyn TransportTrait>, ConnectionError> {
    if port.trim().is_empty() {
        return Err(ConnectionError::Unsupported("no port selected".to_string()));
    }
    Ok(Box::new(SerialTransport::new(port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_port_is_unsupported() {
        assert!(matches!(
            create_transport("  "),
            Err(ConnectionError::Unsupported(_))
        ));
    }

    #[test]
    fn test_serial_transport_info() {
        let transport = create_transport("/dev/ttyUSB0").unwrap();
        assert_eq!(transport.transport_type(), TransportType::Serial);
        assert!(transport.connection_info().starts_with("/dev/ttyUSB0"));
    }
}
