use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use super::{Destination, Markup, PostOutcome};

pub const API_BASE: &str = "https://discord.com/api/v10";
const MAX_MESSAGE_CHARS: usize = 2000;
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Posts digests as bot messages into a Discord text channel.
pub struct DiscordDestination {
    client: Client,
    bot_token: String,
    api_base: String,
}

impl DiscordDestination {
    pub fn new(bot_token: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Discord HTTP client")?;
        Ok(Self {
            client,
            bot_token: bot_token.to_string(),
            api_base: API_BASE.to_string(),
        })
    }

    /// Point the client at a different API root (tests, proxies).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    fn parse_retry_after(headers: &HeaderMap, body: &str) -> Duration {
        let from_header = headers
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok());
        let from_body = || {
            serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("retry_after").and_then(|r| r.as_f64()))
        };

        match from_header.or_else(from_body) {
            Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
                Duration::from_secs_f64(seconds)
            }
            Some(_) => Duration::ZERO,
            None => DEFAULT_RETRY_AFTER,
        }
    }
}

#[async_trait]
impl Destination for DiscordDestination {
    async fn authenticate(&self) -> Result<()> {
        let url = format!("{}/users/@me", self.api_base);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .context("Discord authentication request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|error| format!("<failed to read response body: {error}>"));
            bail!("Discord rejected bot token ({status}): {body}");
        }

        let me: serde_json::Value = response
            .json()
            .await
            .context("parse Discord current user response")?;
        info!(
            "Discord authenticated as {}",
            me.get("username").and_then(|u| u.as_str()).unwrap_or("?")
        );
        Ok(())
    }

    async fn post(&self, channel_id: &str, text: &str) -> PostOutcome {
        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
        let payload = json!({
            "content": text,
            "allowed_mentions": { "parse": [] },
        });

        let response = match self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return PostOutcome::Transient(format!("Discord request failed: {e}")),
        };

        let status = response.status();
        if status.is_success() {
            return PostOutcome::Delivered;
        }

        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .unwrap_or_else(|error| format!("<failed to read response body: {error}>"));

        if status.as_u16() == 429 {
            PostOutcome::RateLimited {
                retry_after: Self::parse_retry_after(&headers, &body),
            }
        } else if status.is_server_error() {
            PostOutcome::Transient(format!("Discord returned {status}: {body}"))
        } else {
            PostOutcome::Rejected(format!("Discord returned {status}: {body}"))
        }
    }

    fn max_payload_chars(&self) -> usize {
        MAX_MESSAGE_CHARS
    }

    fn markup(&self) -> Markup {
        Markup::Markdown
    }
}
