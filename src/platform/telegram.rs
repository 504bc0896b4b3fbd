use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::Recipient;
use teloxide::RequestError;
use tracing::info;

use super::{Destination, Markup, PostOutcome};

/// Telegram's limit for a single text message
const MAX_MESSAGE_CHARS: usize = 4096;

/// Posts digests into a Telegram chat through the Bot API.
pub struct TelegramDestination {
    bot: Bot,
}

impl TelegramDestination {
    pub fn new(bot_token: &str, timeout: Duration) -> Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(timeout)
            .build()
            .context("Failed to build Telegram HTTP client")?;
        Ok(Self {
            bot: Bot::with_client(bot_token, client),
        })
    }
}

/// `@channelname` or a numeric chat id.
fn parse_recipient(channel_id: &str) -> Option<Recipient> {
    let trimmed = channel_id.trim();
    if let Some(name) = trimmed.strip_prefix('@') {
        if name.is_empty() {
            return None;
        }
        return Some(Recipient::ChannelUsername(trimmed.to_string()));
    }
    trimmed.parse::<i64>().ok().map(|id| Recipient::Id(ChatId(id)))
}

fn classify(err: RequestError) -> PostOutcome {
    match err {
        RequestError::RetryAfter(seconds) => PostOutcome::RateLimited {
            retry_after: seconds.duration(),
        },
        RequestError::Network(e) => PostOutcome::Transient(format!("Telegram network error: {e}")),
        RequestError::Io(e) => PostOutcome::Transient(format!("Telegram I/O error: {e}")),
        e @ RequestError::InvalidJson { .. } => PostOutcome::Transient(e.to_string()),
        other => PostOutcome::Rejected(other.to_string()),
    }
}

#[async_trait]
impl Destination for TelegramDestination {
    async fn authenticate(&self) -> Result<()> {
        let me = self
            .bot
            .get_me()
            .await
            .context("Telegram rejected bot token")?;
        info!("Telegram authenticated as @{}", me.username());
        Ok(())
    }

    async fn post(&self, channel_id: &str, text: &str) -> PostOutcome {
        let Some(recipient) = parse_recipient(channel_id) else {
            return PostOutcome::Rejected(format!("invalid Telegram chat id: {channel_id}"));
        };

        match self.bot.send_message(recipient, text).await {
            Ok(_) => PostOutcome::Delivered,
            Err(e) => classify(e),
        }
    }

    fn max_payload_chars(&self) -> usize {
        MAX_MESSAGE_CHARS
    }

    fn markup(&self) -> Markup {
        Markup::Plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recipient() {
        assert_eq!(
            parse_recipient("@links_digest"),
            Some(Recipient::ChannelUsername("@links_digest".into()))
        );
        assert_eq!(
            parse_recipient("-1001234567890"),
            Some(Recipient::Id(ChatId(-1001234567890)))
        );
        assert_eq!(parse_recipient("@"), None);
        assert_eq!(parse_recipient("general"), None);
    }

    #[test]
    fn test_api_errors_are_rejected() {
        let outcome = classify(RequestError::Api(teloxide::ApiError::ChatNotFound));
        assert!(matches!(outcome, PostOutcome::Rejected(_)));
    }

    #[test]
    fn test_retry_after_becomes_rate_limit() {
        let outcome = classify(RequestError::RetryAfter(teloxide::types::Seconds::from_seconds(
            12,
        )));
        assert_eq!(
            outcome,
            PostOutcome::RateLimited {
                retry_after: Duration::from_secs(12)
            }
        );
    }
}
