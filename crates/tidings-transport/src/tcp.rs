//! Plain TCP transport carrying newline-delimited frames.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tidings_core::ConnectionId;
use tidings_protocol::{codec::DEFAULT_MAX_INBOUND_FRAME, Frame, FrameCodec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::traits::{Accepted, FrameSink, FrameSource, Transport, TransportError};

/// TCP transport configuration.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Maximum inbound record size in bytes.
    pub max_frame_size: usize,
    /// Bytes reserved per socket read.
    pub read_buffer_size: usize,
    /// Upper bound on a single frame write.
    pub write_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_INBOUND_FRAME,
            read_buffer_size: 4096,
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// TCP transport.
pub struct TcpTransport {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpTransport {
    /// Bind a new TCP transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        config: TcpConfig,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;

        info!("TCP transport listening on {}", listener.local_addr()?);

        Ok(Self { listener, config })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn accept(&self) -> Result<Accepted, TransportError> {
        let (stream, peer_addr) = self.listener.accept().await?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let id = ConnectionId::generate();
        debug!(connection = %id, peer = %peer_addr, "Accepted TCP connection");

        let (reader, writer) = stream.into_split();
        Ok(Accepted {
            id,
            peer_addr,
            source: Box::new(TcpFrameSource::new(reader, &self.config)),
            sink: Box::new(TcpFrameSink::new(writer, self.config.write_timeout)),
        })
    }

    fn name(&self) -> &'static str {
        "tcp"
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

/// Read half of a TCP connection, with its partial-frame buffer.
pub struct TcpFrameSource {
    reader: OwnedReadHalf,
    read_buffer: BytesMut,
    read_size: usize,
    codec: FrameCodec,
}

impl TcpFrameSource {
    fn new(reader: OwnedReadHalf, config: &TcpConfig) -> Self {
        Self {
            reader,
            read_buffer: BytesMut::with_capacity(config.read_buffer_size),
            read_size: config.read_buffer_size.max(64),
            codec: FrameCodec::with_max_frame_size(config.max_frame_size),
        }
    }
}

#[async_trait]
impl FrameSource for TcpFrameSource {
    async fn recv(&mut self) -> Result<Option<Vec<Frame>>, TransportError> {
        loop {
            let frames = self.codec.decode(&mut self.read_buffer);
            if !frames.is_empty() {
                return Ok(Some(frames));
            }

            self.read_buffer.reserve(self.read_size);
            let n = self.reader.read_buf(&mut self.read_buffer).await?;
            if n == 0 {
                if !self.read_buffer.is_empty() {
                    debug!(
                        pending = self.read_buffer.len(),
                        "Peer closed with an unterminated frame"
                    );
                }
                return Ok(None);
            }
            trace!(bytes = n, "Read from socket");
        }
    }
}

/// Write half of a TCP connection.
pub struct TcpFrameSink {
    writer: Mutex<OwnedWriteHalf>,
    is_open: AtomicBool,
    write_timeout: Duration,
}

impl TcpFrameSink {
    fn new(writer: OwnedWriteHalf, write_timeout: Duration) -> Self {
        Self {
            writer: Mutex::new(writer),
            is_open: AtomicBool::new(true),
            write_timeout,
        }
    }
}

#[async_trait]
impl FrameSink for TcpFrameSink {
    async fn send_raw(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut writer = self.writer.lock().await;
        let result = match tokio::time::timeout(self.write_timeout, writer.write_all(&data)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Err(TransportError::Timeout),
        };

        if result.is_err() {
            self.is_open.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already closed
        }

        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidings_protocol::codec;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpStream;

    async fn pair(config: TcpConfig) -> (Accepted, TcpStream) {
        let transport = TcpTransport::bind("127.0.0.1:0", config).await.unwrap();
        let addr = transport.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let accepted = transport.accept().await.unwrap();
        (accepted, client)
    }

    #[test]
    fn test_tcp_config_default() {
        let config = TcpConfig::default();
        assert_eq!(config.max_frame_size, 64 * 1024);
        assert_eq!(config.read_buffer_size, 4096);
    }

    #[tokio::test]
    async fn test_recv_reassembles_split_frames() {
        let (mut accepted, mut client) = pair(TcpConfig::default()).await;
        let encoded = codec::encode(&Frame::publish("Title", "Body", "tech")).unwrap();
        let (head, tail) = encoded.split_at(7);

        client.write_all(head).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(tail).await.unwrap();

        let frames = accepted.source.recv().await.unwrap().unwrap();
        assert_eq!(frames, vec![Frame::publish("Title", "Body", "tech")]);
    }

    #[tokio::test]
    async fn test_recv_returns_none_on_peer_close() {
        let (mut accepted, client) = pair(TcpConfig::default()).await;
        drop(client);
        assert!(accepted.source.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_and_close() {
        let (accepted, client) = pair(TcpConfig::default()).await;
        let mut lines = tokio::io::BufReader::new(client).lines();

        accepted.sink.send(&Frame::success("hello")).await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, r#"{"type":"success","data":{"message":"hello"}}"#);

        accepted.sink.close().await.unwrap();
        assert!(!accepted.sink.is_open());
        accepted.sink.close().await.unwrap();
        assert!(lines.next_line().await.unwrap().is_none());

        assert!(matches!(
            accepted.sink.send(&Frame::success("late")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
