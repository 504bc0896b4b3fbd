use tracing::debug;

use crate::error::SourceError;
use crate::platform::{ChannelMessage, HistoryRequest, MessageSource};

/// Messages fetched per requested context slot, to ride over deleted or
/// filtered messages.
const OVERFETCH_FACTOR: usize = 2;

/// The conversation around an anchor message, both sides oldest-first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextWindow {
    pub before: Vec<ChannelMessage>,
    pub after: Vec<ChannelMessage>,
    pub requested_before: usize,
    pub requested_after: usize,
}

impl ContextWindow {
    /// Fewer older messages than requested: young channel or anchor near the top of history.
    pub fn before_truncated(&self) -> bool {
        self.before.len() < self.requested_before
    }

    /// Fewer newer messages than requested, usually because the scan ran soon after the post.
    pub fn after_truncated(&self) -> bool {
        self.after.len() < self.requested_after
    }
}

/// Retrieves bounded context around anchor messages.
#[derive(Debug, Clone)]
pub struct ContextFetcher {
    /// Context messages with fewer characters than this are skipped
    min_chars: usize,
}

impl ContextFetcher {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    /// Fetch up to `before_count` older and `after_count` newer messages around `anchor_id`.
    ///
    /// Short history is not an error. Only a failing source call is, and it is
    /// returned as-is so the caller can abort the whole cycle.
    pub async fn fetch(
        &self,
        source: &dyn MessageSource,
        channel: &str,
        anchor_id: i64,
        before_count: usize,
        after_count: usize,
    ) -> Result<ContextWindow, SourceError> {
        let mut before = Vec::new();
        if before_count > 0 {
            let limit = before_count.saturating_mul(OVERFETCH_FACTOR).saturating_add(1);
            let request = HistoryRequest::older_than(channel, anchor_id, limit);
            let mut older: Vec<ChannelMessage> = source
                .fetch_history(&request)
                .await?
                .into_iter()
                .filter(|m| m.id < anchor_id && self.is_worth_showing(m))
                .collect();
            // Nearest first, then keep the closest ones.
            older.sort_by(|a, b| b.id.cmp(&a.id));
            older.truncate(before_count);
            older.reverse();
            before = older;
        }

        let mut after = Vec::new();
        if after_count > 0 {
            let limit = after_count.saturating_mul(OVERFETCH_FACTOR).saturating_add(1);
            let request = HistoryRequest::newer_than(channel, anchor_id, limit);
            let mut newer: Vec<ChannelMessage> = source
                .fetch_history(&request)
                .await?
                .into_iter()
                .filter(|m| m.id > anchor_id && self.is_worth_showing(m))
                .collect();
            newer.sort_by_key(|m| m.id);
            newer.truncate(after_count);
            after = newer;
        }

        let window = ContextWindow {
            before,
            after,
            requested_before: before_count,
            requested_after: after_count,
        };
        debug!(
            anchor_id,
            before = window.before.len(),
            after = window.after.len(),
            "context window fetched"
        );
        Ok(window)
    }

    fn is_worth_showing(&self, message: &ChannelMessage) -> bool {
        message.text.trim().chars().count() >= self.min_chars
    }
}
