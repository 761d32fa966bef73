//! Error types for the virtual-time scheduler.

use thiserror::Error;

/// Outcome delivered to a timer callback that did not complete normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The wait was cancelled, superseded by a rearm, or its timer was dropped
    /// before the deadline was reached.
    #[error("Timer wait cancelled")]
    Cancelled,
}

/// Errors from clock-related conversions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    /// The input was not a `YYYY-MM-DDThh:mm:ssZ` timestamp.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The instant lies before the clock epoch (seconds relative to epoch).
    #[error("Timestamp {0}s is before the epoch")]
    BeforeEpoch(i64),
}

impl ClockError {
    /// Creates an invalid-timestamp error.
    pub fn invalid(input: impl Into<String>) -> Self {
        Self::InvalidTimestamp(input.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(WaitError::Cancelled.to_string(), "Timer wait cancelled");
        assert_eq!(
            ClockError::invalid("yesterday").to_string(),
            "Invalid timestamp: yesterday"
        );
        assert_eq!(
            ClockError::BeforeEpoch(-5).to_string(),
            "Timestamp -5s is before the epoch"
        );
    }
}
