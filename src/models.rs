//! Feed data models.
//!
//! This module defines the records that flow through a route:
//! - [`Stub`]: what a listing page tells us about an item
//! - [`FullItem`]: the syndication record produced after the detail fetch
//! - [`FeedEnvelope`]: feed-level metadata plus the ordered items
//!
//! `FullItem` is serializable in both directions because detail fetches are
//! memoized in the cache as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A listing entry, known without visiting the item's detail page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stub {
    pub title: String,
    pub link: String,
    /// Site-specific record id (thread id, article id) when the listing has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Explicit identity, when it differs from `link`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Short text from the listing, used when the detail page has no body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<String>,
}

impl Stub {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            ..Self::default()
        }
    }

    /// Stable identity of the item: its guid when set, otherwise its link.
    pub fn identity(&self) -> &str {
        self.guid.as_deref().unwrap_or(&self.link)
    }
}

/// Binary attachment referenced by an item (torrent, magnet link, media).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

/// A complete syndication record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FullItem {
    pub title: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Rendered HTML body.
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosure: Option<Enclosure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downvotes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<u64>,
}

impl FullItem {
    /// Start a full item from a stub; `description` falls back to the
    /// listing summary until the detail page provides a body.
    pub fn from_stub(stub: &Stub) -> Self {
        Self {
            title: stub.title.clone(),
            link: stub.link.clone(),
            guid: stub.guid.clone(),
            pub_date: stub.pub_date,
            author: stub.author.clone(),
            image: stub.image.clone(),
            description: stub.summary.clone().unwrap_or_default(),
            category: stub.category.clone(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Identity used to keep items unique within one feed.
    pub fn identity(&self) -> &str {
        self.guid.as_deref().unwrap_or(&self.link)
    }
}

impl From<Stub> for FullItem {
    fn from(stub: Stub) -> Self {
        FullItem::from_stub(&stub)
    }
}

/// The result of one route invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedEnvelope {
    pub title: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub item: Vec<FullItem>,
}
