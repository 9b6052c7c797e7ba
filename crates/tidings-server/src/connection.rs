//! Live connection handles and their lifecycle.
//!
//! ```text
//! Connecting ──▶ Active ──▶ Disconnecting ──▶ Closed
//! ```
//!
//! Only the caller that wins the move into `Disconnecting` performs
//! teardown; every other path that races to close the connection backs off.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use tidings_core::ConnectionId;
use tidings_protocol::Frame;
use tidings_transport::{FrameSink, TransportError};
use tokio::sync::Notify;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Active = 1,
    Disconnecting = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Active,
            2 => ConnectionState::Disconnecting,
            _ => ConnectionState::Closed,
        }
    }
}

/// Why a connection was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent `Disconnect`.
    ClientRequest,
    /// The peer closed its end (zero-length read).
    PeerClosed,
    /// A read or reply write failed.
    Transport(String),
    /// A broadcast write to this connection failed.
    DeliveryFailed,
    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientRequest => f.write_str("client request"),
            DisconnectReason::PeerClosed => f.write_str("peer closed"),
            DisconnectReason::Transport(e) => write!(f, "transport error: {e}"),
            DisconnectReason::DeliveryFailed => f.write_str("delivery failed"),
            DisconnectReason::Shutdown => f.write_str("server shutdown"),
        }
    }
}

/// Shared handle to one client connection.
///
/// The connection's worker owns the read side; the handle (held by the
/// server's live-connection table) owns the write side.
pub struct ConnectionHandle {
    id: ConnectionId,
    peer_addr: SocketAddr,
    sink: Box<dyn FrameSink>,
    state: AtomicU8,
    closed: Notify,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(id: ConnectionId, peer_addr: SocketAddr, sink: Box<dyn FrameSink>) -> Self {
        Self {
            id,
            peer_addr,
            sink,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            closed: Notify::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether teardown has started or finished.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.state() >= ConnectionState::Disconnecting
    }

    /// Move `Connecting → Active`. Returns false if teardown already began.
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Active as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Claim teardown. Exactly one caller ever gets `true`.
    pub fn begin_teardown(&self) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current >= ConnectionState::Disconnecting as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                ConnectionState::Disconnecting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Finish teardown and wake the connection's worker.
    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::SeqCst);
        self.closed.notify_one();
    }

    /// Wait until the connection has been closed by someone else.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }

    /// Send a frame to this connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the connection is closed.
    pub async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        self.sink.send(frame).await
    }

    #[must_use]
    pub fn sink(&self) -> &dyn FrameSink {
        self.sink.as_ref()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}
