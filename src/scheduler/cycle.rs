use std::fmt;

use tracing::{debug, info, warn};

use super::PollScheduler;
use crate::delivery::DeliveryResult;
use crate::digest::Digest;
use crate::error::CycleError;
use crate::extract::{find_match, UrlMatch};
use crate::platform::HistoryRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Extracting,
    Windowing,
    Filtering,
    Formatting,
    Delivering,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Fetching => "fetching",
            CycleState::Extracting => "extracting",
            CycleState::Windowing => "windowing",
            CycleState::Filtering => "filtering",
            CycleState::Formatting => "formatting",
            CycleState::Delivering => "delivering",
        };
        write!(f, "{}", name)
    }
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub scanned: usize,
    pub matches: usize,
    pub already_seen: usize,
    pub delivered: usize,
    pub failed: usize,
    pub cursor: Option<i64>,
}

impl CycleReport {
    pub fn log(&self) {
        info!(
            scanned = self.scanned,
            matches = self.matches,
            delivered = self.delivered,
            already_seen = self.already_seen,
            failed = self.failed,
            cursor = ?self.cursor,
            "cycle complete"
        );
    }
}

impl PollScheduler {
    pub fn state(&self) -> CycleState {
        self.state
    }

    fn transition(&mut self, next: CycleState) {
        debug!(from = %self.state, to = %next, "cycle state");
        self.state = next;
    }

    /// One full pass. On error the cursor is left where it was; digests
    /// delivered before the error stay marked.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let result = self.cycle().await;
        if let Err(err) = &result {
            debug!(state = %self.state(), error = %err, "cycle stopped early");
        }
        self.transition(CycleState::Idle);
        result
    }

    async fn cycle(&mut self) -> Result<CycleReport, CycleError> {
        let mut report = CycleReport::default();
        let channel = self.tracker.channel().to_string();

        self.transition(CycleState::Fetching);
        let cursor = self.tracker.cursor();
        let request = match cursor {
            Some(id) => HistoryRequest::newer_than(&channel, id, self.settings.fetch_limit),
            None => HistoryRequest::latest(&channel, self.settings.fetch_limit),
        };
        let mut batch = self.source.fetch_history(&request).await?;
        batch.retain(|m| cursor.map_or(true, |c| m.id > c));
        batch.sort_by_key(|m| m.id);
        batch.dedup_by_key(|m| m.id);
        report.scanned = batch.len();

        self.transition(CycleState::Extracting);
        let matches: Vec<UrlMatch<'_>> = batch.iter().filter_map(find_match).collect();
        report.matches = matches.len();

        self.transition(CycleState::Windowing);
        let mut windowed = Vec::with_capacity(matches.len());
        for url_match in matches {
            let window = self
                .fetcher
                .fetch(
                    self.source.as_ref(),
                    &channel,
                    url_match.id(),
                    self.settings.context_before,
                    self.settings.context_after,
                )
                .await?;
            if window.before_truncated() || window.after_truncated() {
                debug!(
                    message_id = url_match.id(),
                    before = window.before.len(),
                    after = window.after.len(),
                    "context window shorter than requested"
                );
            }
            windowed.push((url_match, window));
        }

        self.transition(CycleState::Filtering);
        let total = windowed.len();
        windowed.retain(|(url_match, _)| !self.tracker.is_seen(url_match.id()));
        report.already_seen = total - windowed.len();

        self.transition(CycleState::Formatting);
        let digests: Vec<Digest> = windowed
            .iter()
            .map(|(url_match, window)| self.formatter.render(url_match, window))
            .collect();

        self.transition(CycleState::Delivering);
        for (index, digest) in digests.iter().enumerate() {
            if self.shutdown.is_requested() {
                return Err(CycleError::Interrupted);
            }
            if index > 0
                && !self.settings.delivery_spacing.is_zero()
                && !self.shutdown.sleep(self.settings.delivery_spacing).await
            {
                return Err(CycleError::Interrupted);
            }
            if digest.dropped_lines > 0 {
                debug!(
                    message_id = digest.message_id,
                    dropped = digest.dropped_lines,
                    "context trimmed to fit payload limit"
                );
            }

            match self.dispatcher.deliver(digest).await {
                DeliveryResult::Delivered { attempts } => {
                    self.tracker.mark_seen(digest.message_id)?;
                    report.delivered += 1;
                    info!(message_id = digest.message_id, attempts, "digest delivered");
                }
                DeliveryResult::Fatal(reason) => {
                    report.failed += 1;
                    warn!(
                        message_id = digest.message_id,
                        %reason,
                        "digest skipped and left unmarked"
                    );
                }
                DeliveryResult::Retryable(reason) => {
                    if self.shutdown.is_requested() {
                        return Err(CycleError::Interrupted);
                    }
                    return Err(CycleError::DeliveryExhausted {
                        message_id: digest.message_id,
                        reason,
                    });
                }
            }
        }

        if let Some(last) = batch.last() {
            self.tracker.advance_cursor(last.id)?;
            if self.settings.seen_retention > 0 {
                let floor = last.id - self.settings.seen_retention;
                if floor > 0 {
                    self.tracker.prune_before(floor)?;
                }
            }
        }
        report.cursor = self.tracker.cursor();
        Ok(report)
    }
}
