pub mod cycle;
pub mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use tracing::{error, info, warn};

use crate::context::ContextFetcher;
use crate::delivery::{Dispatcher, RetryPolicy};
use crate::digest::DigestFormatter;
use crate::error::CycleError;
use crate::platform::{Destination, MessageSource};
use crate::store::SeenTracker;

pub use cycle::{CycleReport, CycleState};
pub use shutdown::Shutdown;

/// Everything the poll loop needs to know, resolved from configuration.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub fetch_limit: usize,
    pub context_before: usize,
    pub context_after: usize,
    pub context_min_chars: usize,
    /// Seen ids older than `cursor - seen_retention` are pruned; 0 disables pruning
    pub seen_retention: i64,
    pub delivery_spacing: Duration,
    pub destination_channel: String,
    pub utc_offset: FixedOffset,
    pub context_text_max_chars: usize,
    pub retry: RetryPolicy,
}

/// Drives one scan-extract-fetch-format-deliver pass per interval.
///
/// Owns the seen-set and cursor exclusively; cycles never overlap.
pub struct PollScheduler {
    source: Arc<dyn MessageSource>,
    tracker: SeenTracker,
    fetcher: ContextFetcher,
    formatter: DigestFormatter,
    dispatcher: Dispatcher,
    settings: PollSettings,
    shutdown: Shutdown,
    state: CycleState,
}

impl PollScheduler {
    pub fn new(
        source: Arc<dyn MessageSource>,
        destination: Arc<dyn Destination>,
        tracker: SeenTracker,
        settings: PollSettings,
        shutdown: Shutdown,
    ) -> Self {
        let fetcher = ContextFetcher::new(settings.context_min_chars);
        let formatter = DigestFormatter::new(
            settings.utc_offset,
            settings.context_text_max_chars,
            destination.max_payload_chars(),
            destination.markup(),
        );
        let dispatcher = Dispatcher::new(
            destination,
            &settings.destination_channel,
            settings.retry.clone(),
            shutdown.clone(),
        );
        Self {
            source,
            tracker,
            fetcher,
            formatter,
            dispatcher,
            settings,
            shutdown,
            state: CycleState::Idle,
        }
    }

    pub fn tracker(&self) -> &SeenTracker {
        &self.tracker
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run cycles until shutdown is requested or a fatal error occurs.
    ///
    /// Retryable failures abort only the current cycle; the next one starts
    /// after the normal interval.
    pub async fn run(&mut self) -> Result<(), CycleError> {
        info!(
            "Poll loop starting (channel {}, every {}s)",
            self.tracker.channel(),
            self.settings.interval.as_secs()
        );

        loop {
            if self.shutdown.is_requested() {
                break;
            }

            match self.run_cycle().await {
                Ok(report) => report.log(),
                Err(CycleError::Interrupted) => {
                    info!("Cycle interrupted by shutdown");
                    break;
                }
                Err(err) if err.is_retryable() => {
                    warn!(error = %err, "cycle aborted, retrying at next interval");
                }
                Err(err) => {
                    error!(error = %err, "unrecoverable error, stopping");
                    return Err(err);
                }
            }

            if !self.shutdown.sleep(self.settings.interval).await {
                break;
            }
        }

        info!("Poll loop stopped");
        Ok(())
    }

    /// Run a single cycle and return its outcome.
    ///
    /// `Ok(None)` means the cycle was cut short by a shutdown request.
    pub async fn run_once(&mut self) -> Result<Option<CycleReport>, CycleError> {
        match self.run_cycle().await {
            Ok(report) => {
                report.log();
                Ok(Some(report))
            }
            Err(CycleError::Interrupted) => {
                info!("Cycle interrupted by shutdown");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
