//! Dispatch attempt - one time-boxed offer of an intervention to one technician
//!
//! Attempts are immutable audit records apart from the status/resolved_at
//! pair, which transitions exactly once from `Pending` to a terminal state.

use serde::{Deserialize, Serialize};

/// Dispatch attempt status
///
/// `Pending` is the only non-terminal state. All transitions out of it are
/// final; a terminal attempt is never mutated again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    /// Offer open, waiting for the technician within the offer window
    #[default]
    Pending,
    /// Technician accepted before the deadline
    Accepted,
    /// Technician declined before the deadline
    Declined,
    /// Offer window elapsed without a response
    TimedOut,
    /// Intervention was cancelled while the offer was open
    Cancelled,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Accepted => write!(f, "ACCEPTED"),
            Self::Declined => write!(f, "DECLINED"),
            Self::TimedOut => write!(f, "TIMED_OUT"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// One offer of an intervention to one technician
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchAttempt {
    /// Attempt ID (assigned by server)
    pub id: String,
    /// Intervention this offer belongs to
    pub intervention_id: String,
    /// Technician the offer was made to
    pub technician_id: String,
    /// Status
    pub status: AttemptStatus,
    /// Creation timestamp (Unix millis)
    pub created_at: i64,
    /// Offer deadline (Unix millis). Fixed at creation, never extended.
    pub timeout_at: i64,
    /// When the attempt reached a terminal state (Unix millis)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
}

impl DispatchAttempt {
    /// Create a pending offer with the deadline fixed at creation time
    pub fn new(
        id: String,
        intervention_id: String,
        technician_id: String,
        offer_window_ms: i64,
    ) -> Self {
        let now = crate::util::now_millis();
        Self {
            id,
            intervention_id,
            technician_id,
            status: AttemptStatus::Pending,
            created_at: now,
            timeout_at: now + offer_window_ms,
            resolved_at: None,
        }
    }

    /// Whether the offer window has elapsed at `now`
    pub fn is_expired(&self, now: i64) -> bool {
        self.status == AttemptStatus::Pending && self.timeout_at < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_is_creation_plus_window() {
        let attempt = DispatchAttempt::new(
            "a-1".to_string(),
            "i-1".to_string(),
            "t-1".to_string(),
            120_000,
        );
        assert_eq!(attempt.timeout_at, attempt.created_at + 120_000);
        assert_eq!(attempt.status, AttemptStatus::Pending);
        assert!(attempt.resolved_at.is_none());
    }

    #[test]
    fn expiry_only_applies_to_pending() {
        let mut attempt = DispatchAttempt::new(
            "a-1".to_string(),
            "i-1".to_string(),
            "t-1".to_string(),
            120_000,
        );
        let after_deadline = attempt.timeout_at + 1;
        assert!(attempt.is_expired(after_deadline));
        assert!(!attempt.is_expired(attempt.timeout_at));

        attempt.status = AttemptStatus::Accepted;
        assert!(!attempt.is_expired(after_deadline));
    }
}
