//! # Tidings Server
//!
//! Category-based news distribution over TCP. Clients subscribe to
//! categories, publishers push items, and every subscriber of an item's
//! category receives it as soon as it is stored.
//!
//! ```no_run
//! use tidings_server::{Config, NewsServer};
//!
//! # async fn run() -> Result<(), tidings_server::ServerError> {
//! let server = NewsServer::bind(Config::default()).await?;
//! server
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod metrics;
pub mod server;
mod session;

pub use config::Config;
pub use connection::{ConnectionHandle, ConnectionState, DisconnectReason};
pub use server::{BroadcastReport, NewsServer, ServerError, ServerHandle, ServerStats};
