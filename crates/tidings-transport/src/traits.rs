//! Transport abstraction traits for Tidings.
//!
//! The server only talks to connections through these traits, which also
//! lets tests substitute in-memory sinks.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use thiserror::Error;
use tidings_core::ConnectionId;
use tidings_protocol::{codec, Frame, ProtocolError};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A write did not complete in time.
    #[error("Write timed out")]
    Timeout,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The write half of a connection.
///
/// Sinks are shared between the connection's own worker (replies) and
/// publishers' workers (fan-out), so every method takes `&self`.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Encode and send a frame.
    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let data = codec::encode(frame)?;
        self.send_raw(data).await
    }

    /// Send pre-encoded frame bytes.
    ///
    /// Broadcast encodes a frame once and hands the same bytes to every sink.
    async fn send_raw(&self, data: Bytes) -> Result<(), TransportError>;

    /// Shut the write side down. Closing twice is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the sink still accepts writes.
    fn is_open(&self) -> bool;
}

/// The read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next batch of complete frames.
    ///
    /// Returns `None` once the peer has closed the connection. Malformed
    /// records arrive as `Error` frames rather than errors.
    async fn recv(&mut self) -> Result<Option<Vec<Frame>>, TransportError>;
}

/// A freshly accepted connection.
pub struct Accepted {
    /// Identifier assigned at accept time.
    pub id: ConnectionId,
    /// Remote peer address.
    pub peer_addr: SocketAddr,
    /// Inbound frames.
    pub source: Box<dyn FrameSource>,
    /// Outbound frames.
    pub sink: Box<dyn FrameSink>,
}

/// A transport that can accept connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method waits until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Accepted, TransportError>;

    /// Get the transport name.
    fn name(&self) -> &'static str;

    /// Get the local address this transport is bound to.
    fn local_addr(&self) -> Option<SocketAddr>;
}
