//! ROLIE feed documents.
//!
//! The same model is used in both directions: parsing upstream catalogs
//! during enumeration and writing the mirror's own per-label feeds. Fields
//! that upstream feeds commonly omit are optional; feeds written by the
//! mirror always fill them in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A feed reference inside provider metadata
/// (`$.distributions[*].rolie.feeds`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tlp_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A complete ROLIE feed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolieFeed {
    pub feed: FeedData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<Entry>,
}

/// A link with a relation, e.g. `rel=self` or `rel=hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

/// One advisory entry of a feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<EntrySummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
}

/// The canonical schema-format descriptor carried by written entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Format {
    pub schema: String,
    pub version: String,
}

impl Format {
    /// The descriptor for CSAF 2.0 documents.
    pub fn csaf() -> Self {
        Self {
            schema: "https://docs.oasis-open.org/csaf/csaf/v2.0/csaf_json_schema.json"
                .to_string(),
            version: "2.0".to_string(),
        }
    }
}

/// A content pointer (`type` + `src`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(rename = "type")]
    pub content_type: String,
    pub src: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySummary {
    pub content: String,
}

impl FeedData {
    /// Sort entries by their `updated` timestamp, newest first. Entries
    /// without a timestamp sort last.
    pub fn sort_entries_by_updated(&mut self) {
        self.entry
            .sort_by(|a, b| b.updated.cmp(&a.updated));
    }
}
