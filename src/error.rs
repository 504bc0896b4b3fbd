/// Errors from the source history API.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source request failed: {0}")]
    Transport(String),

    #[error("source returned HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("source rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("source rejected request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("source response malformed: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Whether the next cycle may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Transport(_) | SourceError::Server { .. } | SourceError::Malformed(_)
        )
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::Malformed(err.to_string())
        } else {
            SourceError::Transport(err.to_string())
        }
    }
}

/// Why a poll cycle did not complete.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[source] SourceError),

    #[error("delivery of message {message_id} still failing after retries: {reason}")]
    DeliveryExhausted { message_id: i64, reason: String },

    #[error("cycle interrupted by shutdown")]
    Interrupted,

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("state store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl CycleError {
    /// Retryable errors abort the cycle; the next one starts at the normal interval.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CycleError::SourceUnavailable(_) | CycleError::DeliveryExhausted { .. }
        )
    }
}

impl From<SourceError> for CycleError {
    fn from(err: SourceError) -> Self {
        if err.is_retryable() {
            CycleError::SourceUnavailable(err)
        } else {
            CycleError::Fatal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_and_server_errors_are_retryable() {
        assert!(SourceError::Transport("timed out".into()).is_retryable());
        assert!(SourceError::Server {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(SourceError::Malformed("not json".into()).is_retryable());
    }

    #[test]
    fn test_auth_errors_are_fatal() {
        assert!(!SourceError::Unauthorized { status: 401 }.is_retryable());
        let cycle: CycleError = SourceError::Unauthorized { status: 403 }.into();
        assert!(matches!(cycle, CycleError::Fatal(_)));
        assert!(!cycle.is_retryable());
    }

    #[test]
    fn test_retryable_source_error_maps_to_source_unavailable() {
        let cycle: CycleError = SourceError::Transport("reset".into()).into();
        assert!(matches!(cycle, CycleError::SourceUnavailable(_)));
        assert!(cycle.is_retryable());
    }

    #[test]
    fn test_interrupt_and_store_errors_are_not_retryable() {
        assert!(!CycleError::Interrupted.is_retryable());
        let store: CycleError = anyhow::anyhow!("disk full").into();
        assert!(!store.is_retryable());
    }
}
