//! Payment provider seam
//!
//! The processor lives behind [`PaymentProvider`]; the manager only ever
//! needs customer lookup/creation and manual-capture authorizations. All
//! calls are at-least-once from the caller's perspective.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use shared::util;

/// Provider-side failure modes
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure, worth retrying by the caller
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the operation (card declined, bad request)
    #[error("Payment provider rejected the request: {0}")]
    Rejected(String),

    /// Cancellation of a hold the provider already settled or expired
    #[error("Authorization {0} is already in a terminal state")]
    AlreadyTerminal(String),
}

/// Result of a successful authorization call
#[derive(Debug, Clone)]
pub struct ProviderAuthorization {
    /// Provider payment reference, required for capture/cancel
    pub provider_payment_id: String,
    /// Secret handed to the front end to confirm the hold
    pub client_secret: String,
}

/// External payment processor abstraction
///
/// `create_authorization` must create a manual-capture hold: funds reserved,
/// not transferred. Capture and webhooks stay outside this seam.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Look up an existing customer record by email
    async fn find_customer_by_email(&self, email: &str) -> Result<Option<String>, ProviderError>;

    /// Create a customer record keyed by email
    async fn create_customer(&self, email: &str) -> Result<String, ProviderError>;

    /// Reserve `amount` on the customer's payment method (manual capture)
    async fn create_authorization(
        &self,
        customer_id: &str,
        amount: Decimal,
        currency: &str,
        metadata: HashMap<String, String>,
    ) -> Result<ProviderAuthorization, ProviderError>;

    /// Release a previously created hold
    ///
    /// May fail with [`ProviderError::AlreadyTerminal`] when the hold was
    /// already captured or expired; callers on the cancellation path swallow
    /// that.
    async fn cancel_authorization(&self, provider_payment_id: &str) -> Result<(), ProviderError>;
}

/// In-process provider for development and staging
///
/// Issues locally generated references and tracks holds in memory, so the
/// full authorize/cancel/capture flow works without processor credentials.
#[derive(Default)]
pub struct SandboxProvider {
    customers: Mutex<HashMap<String, String>>,
    open_holds: Mutex<HashMap<String, Decimal>>,
}

impl SandboxProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentProvider for SandboxProvider {
    async fn find_customer_by_email(&self, email: &str) -> Result<Option<String>, ProviderError> {
        let customers = self
            .customers
            .lock()
            .map_err(|_| ProviderError::Unavailable("sandbox state poisoned".to_string()))?;
        Ok(customers.get(email).cloned())
    }

    async fn create_customer(&self, email: &str) -> Result<String, ProviderError> {
        let mut customers = self
            .customers
            .lock()
            .map_err(|_| ProviderError::Unavailable("sandbox state poisoned".to_string()))?;
        let customer_id = format!("cus_sbx_{}", util::new_id());
        customers.insert(email.to_string(), customer_id.clone());
        Ok(customer_id)
    }

    async fn create_authorization(
        &self,
        _customer_id: &str,
        amount: Decimal,
        _currency: &str,
        _metadata: HashMap<String, String>,
    ) -> Result<ProviderAuthorization, ProviderError> {
        if amount <= Decimal::ZERO {
            return Err(ProviderError::Rejected("amount must be positive".to_string()));
        }
        let provider_payment_id = format!("pi_sbx_{}", util::new_id());
        let client_secret = format!("{}_secret_{}", provider_payment_id, util::new_id());
        let mut holds = self
            .open_holds
            .lock()
            .map_err(|_| ProviderError::Unavailable("sandbox state poisoned".to_string()))?;
        holds.insert(provider_payment_id.clone(), amount);
        Ok(ProviderAuthorization {
            provider_payment_id,
            client_secret,
        })
    }

    async fn cancel_authorization(&self, provider_payment_id: &str) -> Result<(), ProviderError> {
        let mut holds = self
            .open_holds
            .lock()
            .map_err(|_| ProviderError::Unavailable("sandbox state poisoned".to_string()))?;
        if holds.remove(provider_payment_id).is_none() {
            return Err(ProviderError::AlreadyTerminal(
                provider_payment_id.to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sandbox_reuses_customer_by_email() {
        let provider = SandboxProvider::new();
        assert!(provider
            .find_customer_by_email("ana@example.com")
            .await
            .unwrap()
            .is_none());

        let created = provider.create_customer("ana@example.com").await.unwrap();
        let found = provider
            .find_customer_by_email("ana@example.com")
            .await
            .unwrap();
        assert_eq!(found, Some(created));
    }

    #[tokio::test]
    async fn sandbox_hold_can_only_be_released_once() {
        let provider = SandboxProvider::new();
        let auth = provider
            .create_authorization(
                "cus_sbx_1",
                Decimal::new(12000, 2),
                "EUR",
                HashMap::new(),
            )
            .await
            .unwrap();

        provider
            .cancel_authorization(&auth.provider_payment_id)
            .await
            .unwrap();
        assert!(matches!(
            provider
                .cancel_authorization(&auth.provider_payment_id)
                .await,
            Err(ProviderError::AlreadyTerminal(_))
        ));
    }
}
