//! In-memory source and destination used by the pipeline tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::SourceError;
use crate::platform::{
    ChannelMessage, Destination, Direction, HistoryRequest, Markup, MessageSource, PostOutcome,
};

/// Timestamp for message `id`: one minute apart, starting 2024-05-01 12:00 UTC.
pub fn at(id: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(id)
}

pub fn history(items: &[(i64, &str)]) -> Vec<ChannelMessage> {
    items
        .iter()
        .map(|(id, text)| ChannelMessage::plain(*id, &format!("user{id}"), text, at(*id)))
        .collect()
}

pub struct FakeSource {
    messages: Mutex<Vec<ChannelMessage>>,
    failures: Mutex<VecDeque<SourceError>>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(messages: Vec<ChannelMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, message: ChannelMessage) {
        self.messages.lock().unwrap().push(message);
    }

    pub fn fail_next(&self, err: SourceError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn authenticate(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn fetch_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<Vec<ChannelMessage>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let mut selected: Vec<ChannelMessage> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| match (request.direction, request.from_id) {
                (Direction::Older, Some(id)) => m.id < id,
                (Direction::Newer, Some(id)) => m.id > id,
                (_, None) => true,
            })
            .cloned()
            .collect();

        match request.direction {
            Direction::Older => selected.sort_by(|a, b| b.id.cmp(&a.id)),
            Direction::Newer => selected.sort_by_key(|m| m.id),
        }
        selected.truncate(request.limit);
        Ok(selected)
    }
}

pub struct FakeDestination {
    posts: Mutex<Vec<(String, String)>>,
    script: Mutex<VecDeque<PostOutcome>>,
    attempts: AtomicUsize,
    max_chars: usize,
    markup: Markup,
}

impl FakeDestination {
    pub fn new() -> Self {
        Self::with_limit(2000, Markup::Markdown)
    }

    pub fn with_limit(max_chars: usize, markup: Markup) -> Self {
        Self {
            posts: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
            max_chars,
            markup,
        }
    }

    /// Queue outcomes for the next attempts; afterwards every post succeeds.
    pub fn script(&self, outcomes: impl IntoIterator<Item = PostOutcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    /// Texts that were accepted.
    pub fn delivered(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Destination for FakeDestination {
    async fn authenticate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post(&self, channel_id: &str, text: &str) -> PostOutcome {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PostOutcome::Delivered);
        if outcome == PostOutcome::Delivered {
            self.posts
                .lock()
                .unwrap()
                .push((channel_id.to_string(), text.to_string()));
        }
        outcome
    }

    fn max_payload_chars(&self) -> usize {
        self.max_chars
    }

    fn markup(&self) -> Markup {
        self.markup
    }
}
