//! # tidings-protocol
//!
//! Wire protocol definitions for the Tidings news distribution server.
//!
//! Every message is one UTF-8 JSON object terminated by `\n`:
//!
//! ```text
//! {"type":"publish","data":{"title":"...","body":"...","category":"tech"}}
//! ```
//!
//! ## Frame Types
//!
//! - `Subscribe` / `Unsubscribe` / `ListCategories` - Category membership
//! - `Publish` / `History` / `Delete` / `ClearHistory` - News items
//! - `NewsUpdate` / `NewsHistory` - Server pushes and replies
//! - `Success` / `Error` - Acknowledgments and errors
//!
//! ## Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use tidings_protocol::{codec, Frame};
//!
//! let frame = Frame::publish("Launch", "The rocket went up", "tech");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let mut buf = BytesMut::from(&encoded[..]);
//! assert_eq!(codec::decode(&mut buf), vec![frame]);
//! ```

pub mod codec;
pub mod frames;
pub mod news;

pub use codec::{decode, encode, FrameCodec, ProtocolError};
pub use frames::{Frame, FrameType, DEFAULT_HISTORY_LIMIT};
pub use news::{NewsId, NewsItem};
