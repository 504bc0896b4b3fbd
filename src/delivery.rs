use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::digest::Digest;
use crate::platform::{Destination, PostOutcome};
use crate::scheduler::shutdown::Shutdown;

/// Final classification of one digest hand-off.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryResult {
    Delivered { attempts: u32 },
    /// Retry budget spent or interrupted; the digest stays undelivered
    Retryable(String),
    /// Rejected by the destination; retrying as-is cannot succeed
    Fatal(String),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts allowed for transient failures (timeouts, 5xx)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Rate-limit waits honoured before giving up for this cycle
    pub max_rate_limit_waits: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_rate_limit_waits: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failures`-th transient failure: doubling, capped.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Sends digests to the destination channel, one at a time.
pub struct Dispatcher {
    destination: Arc<dyn Destination>,
    channel_id: String,
    policy: RetryPolicy,
    shutdown: Shutdown,
}

impl Dispatcher {
    pub fn new(
        destination: Arc<dyn Destination>,
        channel_id: &str,
        policy: RetryPolicy,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            destination,
            channel_id: channel_id.to_string(),
            policy,
            shutdown,
        }
    }

    /// Post a short operator notice, outside the retry machinery.
    pub async fn announce(&self, text: &str) {
        match self.destination.post(&self.channel_id, text).await {
            PostOutcome::Delivered => info!("Startup notice posted"),
            other => warn!("Startup notice not posted: {:?}", other),
        }
    }

    /// Hand `digest` to the destination, retrying transient failures and
    /// honouring rate-limit waits. Exactly one digest per call.
    pub async fn deliver(&mut self, digest: &Digest) -> DeliveryResult {
        let mut attempts = 0u32;
        let mut failures = 0u32;
        let mut rate_limit_waits = 0u32;

        loop {
            attempts += 1;
            match self.destination.post(&self.channel_id, &digest.text).await {
                PostOutcome::Delivered => return DeliveryResult::Delivered { attempts },
                PostOutcome::Rejected(reason) => {
                    error!(
                        message_id = digest.message_id,
                        %reason,
                        "destination rejected digest"
                    );
                    return DeliveryResult::Fatal(reason);
                }
                PostOutcome::RateLimited { retry_after } => {
                    rate_limit_waits += 1;
                    if rate_limit_waits > self.policy.max_rate_limit_waits {
                        return DeliveryResult::Retryable(format!(
                            "still rate limited after {} waits",
                            self.policy.max_rate_limit_waits
                        ));
                    }
                    warn!(
                        message_id = digest.message_id,
                        wait_secs = retry_after.as_secs_f64(),
                        "destination rate limited, waiting"
                    );
                    if !self.shutdown.sleep(retry_after).await {
                        return DeliveryResult::Retryable("shutdown during rate-limit wait".into());
                    }
                }
                PostOutcome::Transient(reason) => {
                    failures += 1;
                    if failures >= self.policy.max_attempts {
                        return DeliveryResult::Retryable(reason);
                    }
                    let delay = self.policy.backoff(failures);
                    warn!(
                        message_id = digest.message_id,
                        attempt = attempts,
                        delay_secs = delay.as_secs_f64(),
                        %reason,
                        "transient delivery failure, backing off"
                    );
                    if !self.shutdown.sleep(delay).await {
                        return DeliveryResult::Retryable("shutdown during backoff".into());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDestination;
    use tokio::time::Instant;

    fn digest() -> Digest {
        Digest {
            message_id: 100,
            text: "digest body".to_string(),
            dropped_lines: 0,
        }
    }

    fn dispatcher(dest: &Arc<FakeDestination>) -> (tokio::sync::watch::Sender<bool>, Dispatcher) {
        let (tx, shutdown) = Shutdown::new();
        let d = Dispatcher::new(dest.clone(), "dest-chan", RetryPolicy::default(), shutdown);
        (tx, d)
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(6), Duration::from_secs(60));
        assert_eq!(policy.backoff(100), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_then_retries_same_digest() {
        let dest = Arc::new(FakeDestination::new());
        dest.script([PostOutcome::RateLimited {
            retry_after: Duration::from_secs(30),
        }]);
        let (_tx, mut dispatcher) = dispatcher(&dest);

        let start = Instant::now();
        let result = dispatcher.deliver(&digest()).await;
        assert_eq!(result, DeliveryResult::Delivered { attempts: 2 });
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(dest.delivered(), vec!["digest body".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_back_off_then_succeed() {
        let dest = Arc::new(FakeDestination::new());
        dest.script([
            PostOutcome::Transient("HTTP 502".into()),
            PostOutcome::Transient("timeout".into()),
        ]);
        let (_tx, mut dispatcher) = dispatcher(&dest);

        let start = Instant::now();
        let result = dispatcher.deliver(&digest()).await;
        assert_eq!(result, DeliveryResult::Delivered { attempts: 3 });
        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_budget_exhausted_is_retryable() {
        let dest = Arc::new(FakeDestination::new());
        dest.script([
            PostOutcome::Transient("HTTP 500".into()),
            PostOutcome::Transient("HTTP 500".into()),
            PostOutcome::Transient("HTTP 503".into()),
        ]);
        let (_tx, mut dispatcher) = dispatcher(&dest);

        let result = dispatcher.deliver(&digest()).await;
        assert_eq!(result, DeliveryResult::Retryable("HTTP 503".into()));
        assert_eq!(dest.attempts(), 3);
        assert!(dest.delivered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_fatal_without_retry() {
        let dest = Arc::new(FakeDestination::new());
        dest.script([PostOutcome::Rejected("HTTP 403: Missing Permissions".into())]);
        let (_tx, mut dispatcher) = dispatcher(&dest);

        let result = dispatcher.deliver(&digest()).await;
        assert!(matches!(result, DeliveryResult::Fatal(_)));
        assert_eq!(dest.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endless_rate_limit_gives_up() {
        let dest = Arc::new(FakeDestination::new());
        let limited = PostOutcome::RateLimited {
            retry_after: Duration::from_secs(1),
        };
        dest.script(std::iter::repeat(limited).take(4));
        let (_tx, mut dispatcher) = dispatcher(&dest);

        let result = dispatcher.deliver(&digest()).await;
        assert!(matches!(result, DeliveryResult::Retryable(_)));
        assert_eq!(dest.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff_leaves_digest_undelivered() {
        let dest = Arc::new(FakeDestination::new());
        dest.script([PostOutcome::RateLimited {
            retry_after: Duration::from_secs(600),
        }]);
        let (tx, mut dispatcher) = dispatcher(&dest);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tx.send(true);
        });

        let result = dispatcher.deliver(&digest()).await;
        assert!(matches!(result, DeliveryResult::Retryable(_)));
        assert!(dest.delivered().is_empty());
    }
}
