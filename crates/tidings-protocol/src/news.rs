//! The news item record shared by history replies and the persisted store.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A unique, monotonically assigned news item identifier.
pub type NewsId = u64;

/// A published news item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    /// Store-assigned identifier, never reused.
    pub id: NewsId,
    /// Headline.
    pub title: String,
    /// Short body text.
    #[serde(alias = "lead", alias = "summary")]
    pub body: String,
    /// Normalized category name.
    pub category: String,
    /// Creation time.
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Accept RFC 3339 timestamps, and offset-less ISO 8601 ones read as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{raw}': {e}")))
}

impl NewsItem {
    /// Create a new item stamped with the current time.
    #[must_use]
    pub fn new(
        id: NewsId,
        title: impl Into<String>,
        body: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            body: body.into(),
            category: category.into(),
            timestamp: Utc::now(),
        }
    }
}
