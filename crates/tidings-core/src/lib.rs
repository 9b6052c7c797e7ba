//! # tidings-core
//!
//! Shared server state for the Tidings news distribution engine.
//!
//! - **Category** - The fixed, case-normalized topic set
//! - **Registry** - Category ↔ connection subscription index
//! - **Store** - Bounded, persistent news history with monotonic ids
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  subscribe   ┌──────────────┐
//! │  Connection │─────────────▶│   Registry   │
//! └─────────────┘              └──────────────┘
//!        │ publish                    │ subscribers_of
//!        ▼                            ▼
//! ┌─────────────┐              ┌──────────────┐
//! │    Store    │              │   Fan-out    │
//! └─────────────┘              └──────────────┘
//! ```

pub mod category;
pub mod connection;
pub mod registry;
pub mod store;

pub use category::{normalize_category, CategoryError, CategorySet};
pub use connection::ConnectionId;
pub use registry::{RegistryError, RegistryStats, SubscriptionRegistry};
pub use store::{NewsStore, RemoveOutcome, StoreError};
pub use tidings_protocol::{NewsId, NewsItem};
