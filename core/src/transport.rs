//! The nonblocking byte channel a connection's engine reads from and writes
//! to. Per §1, TLS negotiation itself is out of scope — it's handled here
//! only as a transport wrapper around an already-established stream,
//! exposing the same read/write surface as plain TCP.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A nonblocking, readable/writable/closeable byte channel, per the
/// `transport` field of §3's Connection record.
#[async_trait]
pub trait Transport: Send {
    /// Read up to `max` bytes. Returns `Ok(0)` on orderly EOF, matching
    /// §4.C's close-handshake rule ("transport read returns zero bytes").
    async fn read_chunk(&mut self, max: usize) -> std::io::Result<Vec<u8>>;

    /// Write as much of `buf` as the transport accepts right now; short
    /// writes are expected and handled by the engine's write pipeline.
    async fn write_chunk(&mut self, buf: &[u8]) -> std::io::Result<usize>;

    /// Tear down the transport once `close_after_write` has drained.
    async fn shutdown(&mut self) -> std::io::Result<()>;
}

/// Plain (non-TLS) TCP transport.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_chunk(&mut self, max: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let n = self.stream.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn write_chunk(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf).await
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}

/// TLS-wrapped TCP transport, used when the server is configured with a
/// certificate or the client requests `use_tls`.
pub struct TlsTransport {
    stream: tokio_native_tls::TlsStream<TcpStream>,
}

impl TlsTransport {
    pub fn new(stream: tokio_native_tls::TlsStream<TcpStream>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn read_chunk(&mut self, max: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let n = self.stream.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn write_chunk(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf).await
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}
