//! # tidings-transport
//!
//! Transport layer for the Tidings news server.
//!
//! A transport accepts connections and splits each one into a
//! [`FrameSource`] owned by the connection's worker and a shareable
//! [`FrameSink`] used for replies and broadcast fan-out.
//!
//! ```rust,ignore
//! use tidings_transport::{TcpTransport, Transport};
//!
//! let transport = TcpTransport::bind("127.0.0.1:5555".parse()?, Default::default()).await?;
//! let mut accepted = transport.accept().await?;
//! while let Some(frames) = accepted.source.recv().await? {
//!     // Dispatch frames
//! }
//! ```

pub mod tcp;
pub mod traits;

pub use tcp::{TcpConfig, TcpFrameSink, TcpFrameSource, TcpTransport};
pub use traits::{Accepted, FrameSink, FrameSource, Transport, TransportError};
