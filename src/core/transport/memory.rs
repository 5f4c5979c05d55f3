//! In-memory loopback transport
//!
//! `MemoryTransport` is the host side handed to a session; `MemoryDevice` is
//! the far end that plays the hardware: it pushes RX bytes, reads what the
//! host wrote, and can break the link to simulate a fatal read failure.

use super::{ConnectionError, Link, SerialOptions, TransportTrait, TransportType};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadBuf};

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// Host side of an in-memory link
pub struct MemoryTransport {
    stream: Option<DuplexStream>,
    fault: Arc<AtomicBool>,
    refuse_with: Option<ConnectionError>,
}

/// Device side of an in-memory link
pub struct MemoryDevice {
    stream: DuplexStream,
    fault: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Create a connected host/device pair
    pub fn pair() -> (Self, MemoryDevice) {
        let (host, device) = tokio::io::duplex(DUPLEX_CAPACITY);
        let fault = Arc::new(AtomicBool::new(false));
        (
            Self {
                stream: Some(host),
                fault: fault.clone(),
                refuse_with: None,
            },
            MemoryDevice {
                stream: device,
                fault,
            },
        )
    }

    /// A transport whose `open` always fails with `error`
    pub fn refusing(error: ConnectionError) -> Self {
        Self {
            stream: None,
            fault: Arc::new(AtomicBool::new(false)),
            refuse_with: Some(error),
        }
    }
}

#[async_trait]
impl TransportTrait for MemoryTransport {
    async fn open(&mut self, _options: &SerialOptions) -> Result<Link, ConnectionError> {
        if let Some(error) = &self.refuse_with {
            return Err(error.clone());
        }
        let stream = self
            .stream
            .take()
            .ok_or_else(|| ConnectionError::Busy("memory link already opened".to_string()))?;

        let (reader, writer) = tokio::io::split(stream);
        Ok(Link {
            reader: Box::new(FaultableReader {
                inner: reader,
                fault: self.fault.clone(),
            }),
            writer: Box::new(writer),
        })
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Memory
    }

    fn connection_info(&self) -> String {
        "memory loopback".to_string()
    }
}

impl MemoryDevice {
    /// Send bytes to the host (host RX)
    pub async fn push(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    /// Read exactly `len` bytes written by the host, waiting up to `timeout`
    pub async fn read_exact(&mut self, len: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(timeout, self.stream.read_exact(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no data from host"))??;
        Ok(buf)
    }

    /// Read whatever the host wrote within `timeout`
    pub async fn read_available(&mut self, timeout: Duration) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match tokio::time::timeout(timeout, self.stream.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => out.extend_from_slice(&buf[..n]),
                _ => break,
            }
        }
        out
    }

    /// Make the host's next read fail with an I/O error
    pub async fn break_link(&mut self) -> io::Result<()> {
        self.fault.store(true, Ordering::SeqCst);
        // wake the pending read
        self.push(&[0]).await
    }
}

struct FaultableReader<R> {
    inner: R,
    fault: Arc<AtomicBool>,
}

impl<R: AsyncRead + Unpin> AsyncRead for FaultableReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.fault.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "link broken")));
        }
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if poll.is_ready() && self.fault.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "link broken")));
        }
        poll
    }
}
