//! Source adapter for an HTTP/JSON channel-history bridge.
//!
//! The bridge exposes a channel's history as JSON pages; it is the only thing
//! in the process that speaks to the chat platform itself.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    ChannelMessage, Direction, EntityKind, HistoryRequest, LinkButton, LinkPreview,
    MessageEntity, MessageSource,
};
use crate::error::SourceError;

#[derive(Debug, Deserialize)]
struct WireHistory {
    messages: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: i64,
    date: DateTime<Utc>,
    #[serde(default)]
    sender: Option<WireSender>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    entities: Vec<WireEntity>,
    #[serde(default)]
    reply_markup: Option<WireReplyMarkup>,
    #[serde(default)]
    web_page: Option<WireWebPage>,
}

#[derive(Debug, Deserialize)]
struct WireSender {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEntity {
    #[serde(rename = "type")]
    kind: String,
    offset: usize,
    length: usize,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireReplyMarkup {
    #[serde(default)]
    rows: Vec<Vec<WireButton>>,
}

#[derive(Debug, Deserialize)]
struct WireButton {
    #[serde(default)]
    text: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireWebPage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl WireSender {
    fn display_name(&self) -> String {
        let non_empty = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        non_empty(&self.first_name)
            .or_else(|| non_empty(&self.username))
            .or_else(|| self.id.map(|id| id.to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl From<WireMessage> for ChannelMessage {
    fn from(wire: WireMessage) -> Self {
        let author = wire
            .sender
            .as_ref()
            .map(WireSender::display_name)
            .unwrap_or_else(|| "unknown".to_string());

        let entities = wire
            .entities
            .into_iter()
            .map(|e| {
                let kind = match (e.kind.as_str(), e.url) {
                    ("url", _) => EntityKind::Url,
                    ("text_url", Some(url)) => EntityKind::TextUrl { url },
                    _ => EntityKind::Other,
                };
                MessageEntity {
                    kind,
                    offset: e.offset,
                    length: e.length,
                }
            })
            .collect();

        let buttons = wire
            .reply_markup
            .map(|markup| {
                markup
                    .rows
                    .into_iter()
                    .flatten()
                    .filter_map(|b| b.url.map(|url| LinkButton { text: b.text, url }))
                    .collect()
            })
            .unwrap_or_default();

        let preview = wire.web_page.map(|page| LinkPreview {
            url: page.url,
            title: page.title,
        });

        ChannelMessage {
            id: wire.id,
            author,
            text: wire.text,
            date: wire.date,
            entities,
            buttons,
            preview,
        }
    }
}

pub struct BridgeSource {
    client: Client,
    base: Url,
    token: String,
    /// Channel checked by `authenticate`
    channel: String,
}

impl BridgeSource {
    pub fn new(
        base_url: &str,
        token: &str,
        channel: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("Invalid source API URL: {}", base_url))?;
        if base.cannot_be_a_base() {
            bail!("Source API URL cannot carry a path: {}", base_url);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build source HTTP client")?;
        Ok(Self {
            client,
            base,
            token: token.to_string(),
            channel: channel.to_string(),
        })
    }

    fn endpoint(&self, channel: &str, tail: Option<&str>) -> Result<Url, SourceError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SourceError::Malformed(format!("unusable base URL {}", self.base)))?;
            segments.pop_if_empty().push("channels").push(channel);
            if let Some(tail) = tail {
                segments.push(tail);
            }
        }
        Ok(url)
    }

    async fn get(&self, url: Url, query: &[(&str, String)]) -> Result<String, SourceError> {
        let mut request = self.client.get(url).query(query);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(classify(status, body))
        }
    }
}

fn classify(status: StatusCode, body: String) -> SourceError {
    match status.as_u16() {
        code @ (401 | 403) => SourceError::Unauthorized { status: code },
        code @ (429 | 500..=599) => SourceError::Server { status: code, body },
        code => SourceError::Rejected { status: code, body },
    }
}

/// Decode a history page, skipping messages that do not have the expected shape.
fn decode_page(body: &str) -> Result<Vec<ChannelMessage>, SourceError> {
    let page: WireHistory =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;

    let mut messages = Vec::with_capacity(page.messages.len());
    for raw in page.messages {
        match serde_json::from_value::<WireMessage>(raw) {
            Ok(wire) => messages.push(ChannelMessage::from(wire)),
            Err(e) => warn!("Skipping undecodable source message: {}", e),
        }
    }
    Ok(messages)
}

#[async_trait]
impl MessageSource for BridgeSource {
    async fn authenticate(&self) -> Result<(), SourceError> {
        let url = self.endpoint(&self.channel, None)?;
        self.get(url, &[]).await?;
        info!("Source bridge authenticated for channel {}", self.channel);
        Ok(())
    }

    async fn fetch_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<Vec<ChannelMessage>, SourceError> {
        let url = self.endpoint(&request.channel, Some("messages"))?;

        let mut query = vec![("limit", request.limit.to_string())];
        match (request.direction, request.from_id) {
            (Direction::Older, Some(id)) => {
                query.push(("max_id", id.to_string()));
                query.push(("order", "desc".to_string()));
            }
            (Direction::Older, None) => query.push(("order", "desc".to_string())),
            (Direction::Newer, Some(id)) => {
                query.push(("min_id", id.to_string()));
                query.push(("order", "asc".to_string()));
            }
            (Direction::Newer, None) => query.push(("order", "asc".to_string())),
        }

        let body = self.get(url, &query).await?;
        let mut messages = decode_page(&body)?;

        // Bounds are exclusive regardless of how the bridge treats them.
        if let Some(id) = request.from_id {
            messages.retain(|m| match request.direction {
                Direction::Older => m.id < id,
                Direction::Newer => m.id > id,
            });
        }
        match request.direction {
            Direction::Older => messages.sort_by(|a, b| b.id.cmp(&a.id)),
            Direction::Newer => messages.sort_by_key(|m| m.id),
        }
        messages.truncate(request.limit);

        debug!(
            channel = %request.channel,
            direction = ?request.direction,
            from_id = ?request.from_id,
            returned = messages.len(),
            "fetched history page"
        );
        Ok(messages)
    }
}
