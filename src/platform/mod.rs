pub mod bridge;
pub mod discord;
pub mod telegram;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SourceError;

/// A message fetched from the source channel.
///
/// Ids are unique and increase monotonically within a channel. The timestamp is
/// the source platform's clock and is not assumed to agree with ours.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub id: i64,
    /// Display name of the sender
    pub author: String,
    pub text: String,
    pub date: DateTime<Utc>,
    /// Formatting entities attached by the platform (offsets in UTF-16 units)
    pub entities: Vec<MessageEntity>,
    /// Inline keyboard buttons carrying a link
    pub buttons: Vec<LinkButton>,
    /// Link preview block rendered by the platform, if any
    pub preview: Option<LinkPreview>,
}

impl ChannelMessage {
    /// Plain text-only message, used by adapters that carry no rich metadata.
    pub fn plain(id: i64, author: &str, text: &str, date: DateTime<Utc>) -> Self {
        Self {
            id,
            author: author.to_string(),
            text: text.to_string(),
            date,
            entities: Vec::new(),
            buttons: Vec::new(),
            preview: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    /// The covered text is itself a URL
    Url,
    /// The covered text links to a hidden URL
    TextUrl { url: String },
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageEntity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkButton {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkPreview {
    pub url: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ids strictly below `from_id`, nearest first
    Older,
    /// Ids strictly above `from_id`, oldest first
    Newer,
}

/// One history page request against the source.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRequest {
    pub channel: String,
    /// `None` with `Direction::Older` means "the latest messages"
    pub from_id: Option<i64>,
    pub direction: Direction,
    pub limit: usize,
}

impl HistoryRequest {
    pub fn latest(channel: &str, limit: usize) -> Self {
        Self {
            channel: channel.to_string(),
            from_id: None,
            direction: Direction::Older,
            limit,
        }
    }

    pub fn older_than(channel: &str, id: i64, limit: usize) -> Self {
        Self {
            channel: channel.to_string(),
            from_id: Some(id),
            direction: Direction::Older,
            limit,
        }
    }

    pub fn newer_than(channel: &str, id: i64, limit: usize) -> Self {
        Self {
            channel: channel.to_string(),
            from_id: Some(id),
            direction: Direction::Newer,
            limit,
        }
    }
}

/// Read side: the chat platform we scan for links.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn authenticate(&self) -> Result<(), SourceError>;

    async fn fetch_history(&self, request: &HistoryRequest)
        -> Result<Vec<ChannelMessage>, SourceError>;
}

/// How the destination renders emphasis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    Markdown,
    Plain,
}

/// Raw response classification from a single post attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    Delivered,
    RateLimited { retry_after: Duration },
    /// Timeouts, transport failures, 5xx
    Transient(String),
    /// Auth/permission failures and malformed payloads
    Rejected(String),
}

/// Write side: where digests are published.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn authenticate(&self) -> anyhow::Result<()>;

    async fn post(&self, channel_id: &str, text: &str) -> PostOutcome;

    /// Maximum payload length in characters
    fn max_payload_chars(&self) -> usize;

    fn markup(&self) -> Markup;
}
