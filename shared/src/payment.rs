//! Payment authorization - a provider-side hold of funds for one intervention
//!
//! Funds are reserved at quote confirmation (manual-capture mode) and either
//! captured at completion or released when the intervention is abandoned.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Authorization status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationStatus {
    /// Local row created, provider call not yet confirmed
    #[default]
    Pending,
    /// Provider hold in place, reference attached
    Authorized,
    /// Hold converted into an actual charge (terminal)
    Captured,
    /// Hold released (terminal)
    Cancelled,
    /// Provider rejected the authorization (terminal)
    Failed,
}

impl AuthorizationStatus {
    /// Pending and Authorized are the only states that can still move
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Captured | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Authorized => write!(f, "AUTHORIZED"),
            Self::Captured => write!(f, "CAPTURED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Provider-side fund hold tied one-to-one with an intervention
///
/// At most one authorization per intervention is non-terminal at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentAuthorization {
    /// Authorization ID (assigned by server)
    pub id: String,
    /// Intervention the hold is scoped to
    pub intervention_id: String,
    /// Held amount
    pub amount: Decimal,
    /// ISO 4217 currency code
    pub currency: String,
    /// Status
    pub status: AuthorizationStatus,
    /// Provider payment reference, attached once the provider call succeeds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_payment_id: Option<String>,
    /// Provider customer reference (keyed by client email)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_customer_id: Option<String>,
    /// Client secret for the front-end confirmation flow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Creation timestamp (Unix millis)
    pub created_at: i64,
    /// Capture timestamp (Unix millis)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<i64>,
    /// Cancellation timestamp (Unix millis)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<i64>,
}

impl PaymentAuthorization {
    /// Create a local pending row, before any provider call
    pub fn new(id: String, intervention_id: String, amount: Decimal, currency: String) -> Self {
        Self {
            id,
            intervention_id,
            amount,
            currency,
            status: AuthorizationStatus::Pending,
            provider_payment_id: None,
            provider_customer_id: None,
            client_secret: None,
            created_at: crate::util::now_millis(),
            captured_at: None,
            cancelled_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_row_is_pending_without_provider_reference() {
        let auth = PaymentAuthorization::new(
            "p-1".to_string(),
            "i-1".to_string(),
            Decimal::new(12000, 2),
            "EUR".to_string(),
        );
        assert_eq!(auth.status, AuthorizationStatus::Pending);
        assert!(auth.provider_payment_id.is_none());
        assert!(auth.cancelled_at.is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(!AuthorizationStatus::Pending.is_terminal());
        assert!(!AuthorizationStatus::Authorized.is_terminal());
        assert!(AuthorizationStatus::Captured.is_terminal());
        assert!(AuthorizationStatus::Cancelled.is_terminal());
        assert!(AuthorizationStatus::Failed.is_terminal());
    }
}
