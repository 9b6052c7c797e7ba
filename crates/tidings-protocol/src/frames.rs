//! Frame types for the Tidings protocol.
//!
//! Every frame travels as one JSON object `{"type": ..., "data": {...}}`
//! followed by a newline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::news::NewsItem;

/// Number of items returned by a `history` request that omits `limit`.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

/// Frame type identifiers, as they appear in the `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Subscribe,
    Unsubscribe,
    ListCategories,
    History,
    Publish,
    Delete,
    ClearHistory,
    Disconnect,
    NewsUpdate,
    NewsHistory,
    Success,
    Error,
    CategoriesList,
}

impl FrameType {
    /// All frame types, in declaration order.
    pub const ALL: [FrameType; 13] = [
        FrameType::Subscribe,
        FrameType::Unsubscribe,
        FrameType::ListCategories,
        FrameType::History,
        FrameType::Publish,
        FrameType::Delete,
        FrameType::ClearHistory,
        FrameType::Disconnect,
        FrameType::NewsUpdate,
        FrameType::NewsHistory,
        FrameType::Success,
        FrameType::Error,
        FrameType::CategoriesList,
    ];

    /// The wire tag for this frame type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Subscribe => "subscribe",
            FrameType::Unsubscribe => "unsubscribe",
            FrameType::ListCategories => "list_categories",
            FrameType::History => "history",
            FrameType::Publish => "publish",
            FrameType::Delete => "delete",
            FrameType::ClearHistory => "clear_history",
            FrameType::Disconnect => "disconnect",
            FrameType::NewsUpdate => "news_update",
            FrameType::NewsHistory => "news_history",
            FrameType::Success => "success",
            FrameType::Error => "error",
            FrameType::CategoriesList => "categories_list",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FrameType::ALL
            .iter()
            .copied()
            .find(|ft| ft.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// A protocol frame.
///
/// Request frames flow from clients and publishers to the server; the
/// remaining variants are server replies and pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Frame {
    /// Subscribe to a category.
    Subscribe {
        /// Category name.
        category: String,
    },

    /// Unsubscribe from a category.
    Unsubscribe {
        /// Category name.
        category: String,
    },

    /// Ask for every configured category.
    ListCategories {},

    /// Ask for stored news, optionally restricted to one category.
    History {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(default = "default_history_limit")]
        limit: usize,
    },

    /// Publish a news item.
    Publish {
        title: String,
        body: String,
        category: String,
    },

    /// Delete stored news items by id.
    Delete {
        ids: Vec<u64>,
    },

    /// Drop the whole stored history.
    ClearHistory {},

    /// Close the connection after acknowledging.
    Disconnect {},

    /// A freshly published item pushed to a subscriber.
    NewsUpdate {
        title: String,
        body: String,
        category: String,
    },

    /// Reply to a `History` request.
    NewsHistory {
        items: Vec<NewsItem>,
    },

    /// Request succeeded.
    Success {
        message: String,
    },

    /// Request failed, or the inbound record could not be understood.
    Error {
        message: String,
    },

    /// Reply to a `ListCategories` request.
    CategoriesList {
        categories: Vec<String>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Subscribe { .. } => FrameType::Subscribe,
            Frame::Unsubscribe { .. } => FrameType::Unsubscribe,
            Frame::ListCategories {} => FrameType::ListCategories,
            Frame::History { .. } => FrameType::History,
            Frame::Publish { .. } => FrameType::Publish,
            Frame::Delete { .. } => FrameType::Delete,
            Frame::ClearHistory {} => FrameType::ClearHistory,
            Frame::Disconnect {} => FrameType::Disconnect,
            Frame::NewsUpdate { .. } => FrameType::NewsUpdate,
            Frame::NewsHistory { .. } => FrameType::NewsHistory,
            Frame::Success { .. } => FrameType::Success,
            Frame::Error { .. } => FrameType::Error,
            Frame::CategoriesList { .. } => FrameType::CategoriesList,
        }
    }

    #[must_use]
    pub fn subscribe(category: impl Into<String>) -> Self {
        Frame::Subscribe {
            category: category.into(),
        }
    }

    #[must_use]
    pub fn unsubscribe(category: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            category: category.into(),
        }
    }

    #[must_use]
    pub fn list_categories() -> Self {
        Frame::ListCategories {}
    }

    /// Create a History request.
    #[must_use]
    pub fn history(category: Option<String>, limit: usize) -> Self {
        Frame::History { category, limit }
    }

    #[must_use]
    pub fn publish(
        title: impl Into<String>,
        body: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Frame::Publish {
            title: title.into(),
            body: body.into(),
            category: category.into(),
        }
    }

    #[must_use]
    pub fn delete(ids: impl Into<Vec<u64>>) -> Self {
        Frame::Delete { ids: ids.into() }
    }

    #[must_use]
    pub fn clear_history() -> Self {
        Frame::ClearHistory {}
    }

    #[must_use]
    pub fn disconnect() -> Self {
        Frame::Disconnect {}
    }

    /// Create the push frame for a stored item.
    #[must_use]
    pub fn news_update(item: &NewsItem) -> Self {
        Frame::NewsUpdate {
            title: item.title.clone(),
            body: item.body.clone(),
            category: item.category.clone(),
        }
    }

    #[must_use]
    pub fn news_history(items: Vec<NewsItem>) -> Self {
        Frame::NewsHistory { items }
    }

    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Frame::Success {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn categories_list(categories: Vec<String>) -> Self {
        Frame::CategoriesList { categories }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type() {
        let subscribe = Frame::subscribe("tech");
        assert_eq!(subscribe.frame_type(), FrameType::Subscribe);

        let update = Frame::NewsUpdate {
            title: "t".into(),
            body: "b".into(),
            category: "tech".into(),
        };
        assert_eq!(update.frame_type(), FrameType::NewsUpdate);
    }

    #[test]
    fn test_frame_type_tags_match_serde() {
        let frame = Frame::list_categories();
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], frame.frame_type().as_str());
        assert_eq!(value["data"], serde_json::json!({}));
    }

    #[test]
    fn test_frame_type_from_str() {
        for ft in FrameType::ALL {
            assert_eq!(ft.as_str().parse::<FrameType>(), Ok(ft));
        }
        assert_eq!("INSCREVER".parse::<FrameType>(), Err("INSCREVER".to_string()));
    }

    #[test]
    fn test_history_limit_defaults() {
        let frame: Frame =
            serde_json::from_str(r#"{"type":"history","data":{"category":"tech"}}"#).unwrap();
        assert_eq!(frame, Frame::history(Some("tech".into()), DEFAULT_HISTORY_LIMIT));
    }
}
