//! Error taxonomy for message synchronization.

use thiserror::Error;

/// What a consumer must do with a delivery after a handling failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge without effect; retrying would not change the outcome.
    Acknowledge,
    /// Leave unacknowledged so the bus redelivers it.
    Retry,
    /// Route to the dead-letter topic, then acknowledge.
    DeadLetter,
}

/// Top-level error type for the synchronization layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The message could not be parsed or does not match its declared type.
    #[error("decode error: {0}")]
    Decode(String),

    /// A business or referential rule rejected the message.
    #[error("rejected: {0}")]
    Rejected(String),

    /// A record the message refers to has not been observed yet.
    #[error("deferred: {0}")]
    Deferred(String),

    /// Invalid input supplied by a local caller.
    #[error("validation error: {0}")]
    Validation(String),

    /// A queried record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A store or bus dependency is unavailable.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl SyncError {
    /// Maps the error class onto the acknowledgment policy.
    ///
    /// Only infrastructure failures and not-yet-observed references are
    /// retried. Malformed input is preserved on the dead-letter topic.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Decode(_) => Disposition::DeadLetter,
            Self::Rejected(_) | Self::Validation(_) | Self::NotFound(_) => {
                Disposition::Acknowledge
            }
            Self::Deferred(_) | Self::Infrastructure(_) => Disposition::Retry,
        }
    }

    /// Whether redelivery of a message failing with this error is capped by
    /// the dispatcher's attempt bound.
    #[must_use]
    pub fn is_bounded_retry(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_errors_are_dead_lettered() {
        assert_eq!(
            SyncError::Decode("bad json".into()).disposition(),
            Disposition::DeadLetter
        );
    }

    #[test]
    fn test_rejections_are_acknowledged() {
        assert_eq!(
            SyncError::Rejected("request cancelled".into()).disposition(),
            Disposition::Acknowledge
        );
    }

    #[test]
    fn test_infrastructure_errors_are_retried_without_bound() {
        let err = SyncError::Infrastructure("connection refused".into());

        assert_eq!(err.disposition(), Disposition::Retry);
        assert!(!err.is_bounded_retry());
    }

    #[test]
    fn test_deferred_errors_are_retried_with_bound() {
        let err = SyncError::Deferred("request r1 not yet observed".into());

        assert_eq!(err.disposition(), Disposition::Retry);
        assert!(err.is_bounded_retry());
    }
}
