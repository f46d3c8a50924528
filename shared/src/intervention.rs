//! Intervention - a field-service request lifecycle record
//!
//! The intervention is the aggregate root: dispatch attempts and payment
//! authorizations are owned by it but persisted independently for history.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Service category offered on the platform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceCategory {
    Locksmith,
    Plumbing,
    Electricity,
    Heating,
    Appliance,
    #[default]
    Other,
}

/// Request priority, set by the client at submission
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    #[default]
    Normal,
    Urgent,
    Emergency,
}

/// Intervention status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterventionStatus {
    /// Submitted, no technician committed yet (dispatch may be in flight)
    #[default]
    New,
    /// A technician accepted the offer
    Assigned,
    /// Technician is on the way
    EnRoute,
    /// Work started on site
    InProgress,
    /// Work finished (terminal)
    Completed,
    /// Abandoned by the client or the platform (terminal)
    Cancelled,
}

impl InterventionStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Statuses in which a technician reference must be present
    pub fn requires_technician(&self) -> bool {
        matches!(
            self,
            Self::Assigned | Self::EnRoute | Self::InProgress | Self::Completed
        )
    }

    /// Allowed technician-driven progression steps.
    ///
    /// Strictly forward, one step at a time; regression is never allowed.
    pub fn can_progress_to(&self, to: InterventionStatus) -> bool {
        matches!(
            (self, to),
            (Self::Assigned, Self::EnRoute)
                | (Self::EnRoute, Self::InProgress)
                | (Self::InProgress, Self::Completed)
        )
    }

    /// Cancellation is allowed until work is in progress
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::New | Self::Assigned | Self::EnRoute)
    }
}

impl std::fmt::Display for InterventionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Assigned => write!(f, "ASSIGNED"),
            Self::EnRoute => write!(f, "EN_ROUTE"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Intervention record
///
/// `technician_id` is `Some` only when `status.requires_technician()`.
/// At most one non-terminal dispatch attempt exists per intervention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intervention {
    /// Intervention ID (assigned by server)
    pub id: String,
    /// Client who submitted the request
    pub client_id: String,
    /// Assigned technician, set on acceptance, cleared on unassignment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technician_id: Option<String>,
    /// Service category
    pub category: ServiceCategory,
    /// Priority
    #[serde(default)]
    pub priority: Priority,
    /// Status
    pub status: InterventionStatus,
    /// Street address
    pub address: String,
    /// Latitude (WGS84)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude (WGS84)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Quoted price, confirmed by the client before payment authorization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_price: Option<Decimal>,
    /// Final billed price, set at completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_price: Option<Decimal>,
    /// Requested schedule (Unix millis)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<i64>,
    /// Work start time (Unix millis)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    /// Work completion time (Unix millis)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// Automatic dispatch exhausted all candidates; an admin must assign
    #[serde(default)]
    pub needs_manual_dispatch: bool,
    /// Active flag (false once terminal)
    #[serde(default = "default_true")]
    pub active: bool,
    /// Creation timestamp (Unix millis)
    pub created_at: i64,
    /// Last update timestamp (Unix millis)
    pub updated_at: i64,
}

fn default_true() -> bool {
    true
}

impl Intervention {
    /// Create a fresh unassigned intervention
    pub fn new(
        id: String,
        client_id: String,
        category: ServiceCategory,
        priority: Priority,
        address: String,
    ) -> Self {
        let now = crate::util::now_millis();
        Self {
            id,
            client_id,
            technician_id: None,
            category,
            priority,
            status: InterventionStatus::New,
            address,
            latitude: None,
            longitude: None,
            estimated_price: None,
            final_price: None,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            needs_manual_dispatch: false,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn technician_required_statuses() {
        assert!(!InterventionStatus::New.requires_technician());
        assert!(InterventionStatus::Assigned.requires_technician());
        assert!(InterventionStatus::Completed.requires_technician());
        assert!(!InterventionStatus::Cancelled.requires_technician());
    }

    #[test]
    fn progression_never_regresses_past_assigned() {
        assert!(InterventionStatus::Assigned.can_progress_to(InterventionStatus::EnRoute));
        assert!(InterventionStatus::EnRoute.can_progress_to(InterventionStatus::InProgress));
        assert!(InterventionStatus::InProgress.can_progress_to(InterventionStatus::Completed));
        assert!(!InterventionStatus::InProgress.can_progress_to(InterventionStatus::New));
        assert!(!InterventionStatus::Completed.can_progress_to(InterventionStatus::InProgress));
        assert!(!InterventionStatus::New.can_progress_to(InterventionStatus::InProgress));
    }

    #[test]
    fn cancel_window_closes_when_work_starts() {
        assert!(InterventionStatus::New.can_cancel());
        assert!(InterventionStatus::Assigned.can_cancel());
        assert!(InterventionStatus::EnRoute.can_cancel());
        assert!(!InterventionStatus::InProgress.can_cancel());
        assert!(!InterventionStatus::Completed.can_cancel());
    }
}
