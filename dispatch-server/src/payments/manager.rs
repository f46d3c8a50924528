//! PaymentManager - authorization lifecycle for intervention fund holds
//!
//! One hold per intervention: created in manual-capture mode when the client
//! confirms the quote, captured by the billing flow at completion, released
//! when the intervention is abandoned.
//!
//! # Authorize Flow
//!
//! ```text
//! authorize(intervention_id, amount, currency, email)
//!     ├─ 1. Validate inputs, verify the intervention exists
//!     ├─ 2. Persist a PENDING row (or resume one left by a failed attempt)
//!     ├─ 3. Find-or-create the provider customer (keyed by email)
//!     ├─ 4. Create the provider hold (manual capture)
//!     ├─ 5. CAS PENDING → AUTHORIZED with the provider references
//!     └─ 6. Publish feed event
//! ```
//!
//! A provider failure at step 3/4 publishes PAYMENT_FAILED, surfaces to the
//! caller, and leaves the row PENDING with no provider reference; a later
//! authorize call resumes it. Cancellation is the mirror image and never
//! lets a provider failure or a concurrent writer keep the local row open.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::dispatch::storage::{DispatchStorage, StorageError, Transition};
use crate::feed::FeedEmitter;
use crate::payments::provider::{PaymentProvider, ProviderAuthorization, ProviderError};
use shared::feed::{EntityType, FeedEventKind};
use shared::payment::{AuthorizationStatus, PaymentAuthorization};
use shared::util;

/// Payment errors
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Intervention not found: {0}")]
    InterventionNotFound(String),

    #[error("Intervention {0} already has an open authorization")]
    Conflict(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Payment authorization manager
///
/// The only component that writes PaymentAuthorization rows.
pub struct PaymentManager {
    storage: DispatchStorage,
    provider: Arc<dyn PaymentProvider>,
    feed: FeedEmitter,
}

impl PaymentManager {
    pub fn new(
        storage: DispatchStorage,
        provider: Arc<dyn PaymentProvider>,
        feed: FeedEmitter,
    ) -> Self {
        Self {
            storage,
            provider,
            feed,
        }
    }

    // ========================================================================
    // Authorize
    // ========================================================================

    /// Create a provider-side hold for the intervention's quoted amount
    pub async fn authorize(
        &self,
        intervention_id: &str,
        amount: Decimal,
        currency: &str,
        customer_email: &str,
    ) -> PaymentResult<PaymentAuthorization> {
        if intervention_id.is_empty() {
            return Err(PaymentError::Validation("intervention_id is required".to_string()));
        }
        if amount <= Decimal::ZERO {
            return Err(PaymentError::Validation(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        if currency.len() != 3 {
            return Err(PaymentError::Validation(format!(
                "currency must be an ISO 4217 code, got {:?}",
                currency
            )));
        }
        if customer_email.is_empty() || !customer_email.contains('@') {
            return Err(PaymentError::Validation(format!(
                "invalid customer email {:?}",
                customer_email
            )));
        }

        self.storage
            .get_intervention(intervention_id)?
            .ok_or_else(|| PaymentError::InterventionNotFound(intervention_id.to_string()))?;

        // Persist the local row before any provider call. A PENDING row
        // without a provider reference (left by a failed attempt) is resumed
        // instead of duplicated; anything else open is a conflict.
        let auth = {
            let txn = self.storage.begin_write()?;
            let auth = match self
                .storage
                .open_authorization_for_intervention_txn(&txn, intervention_id)?
            {
                Some(open)
                    if open.status == AuthorizationStatus::Pending
                        && open.provider_payment_id.is_none() =>
                {
                    tracing::info!(
                        intervention_id = %intervention_id,
                        authorization_id = %open.id,
                        "Resuming pending authorization from an earlier failed attempt"
                    );
                    open
                }
                Some(open) => return Err(PaymentError::Conflict(open.intervention_id)),
                None => {
                    let auth = PaymentAuthorization::new(
                        util::new_id(),
                        intervention_id.to_string(),
                        amount,
                        currency.to_string(),
                    );
                    self.storage.insert_authorization(&txn, &auth)?;
                    auth
                }
            };
            txn.commit().map_err(StorageError::from)?;
            auth
        };

        // Provider calls happen outside any transaction; failure surfaces to
        // the caller with the row still PENDING and reference-free.
        let provider_result: Result<(String, ProviderAuthorization), ProviderError> = async {
            let customer_id = match self.provider.find_customer_by_email(customer_email).await? {
                Some(id) => id,
                None => self.provider.create_customer(customer_email).await?,
            };

            let metadata = HashMap::from([
                ("intervention_id".to_string(), intervention_id.to_string()),
                ("authorization_id".to_string(), auth.id.clone()),
            ]);
            let provider_auth = self
                .provider
                .create_authorization(&customer_id, amount, currency, metadata)
                .await?;
            Ok((customer_id, provider_auth))
        }
        .await;
        let (customer_id, provider_auth) = match provider_result {
            Ok(refs) => refs,
            Err(e) => {
                tracing::warn!(
                    intervention_id = %intervention_id,
                    authorization_id = %auth.id,
                    "Provider rejected or failed the authorization: {}", e
                );
                self.feed.publish(
                    EntityType::PaymentAuthorization,
                    &auth.id,
                    FeedEventKind::PaymentFailed,
                );
                return Err(e.into());
            }
        };

        let txn = self.storage.begin_write()?;
        let transition = self.storage.transition_authorization(
            &txn,
            &auth.id,
            AuthorizationStatus::Pending,
            |a| {
                a.status = AuthorizationStatus::Authorized;
                a.provider_payment_id = Some(provider_auth.provider_payment_id.clone());
                a.provider_customer_id = Some(customer_id.clone());
                a.client_secret = Some(provider_auth.client_secret.clone());
            },
        )?;
        let auth = match transition {
            Transition::Applied(auth) => {
                txn.commit().map_err(StorageError::from)?;
                auth
            }
            Transition::Conflict(actual) => {
                // The row moved while the provider call was in flight (a
                // cancellation raced us). Release the fresh hold so it does
                // not leak, then report the conflict.
                tracing::warn!(
                    intervention_id = %intervention_id,
                    authorization_id = %auth.id,
                    actual_status = %actual,
                    "Authorization row changed during provider call, releasing the new hold"
                );
                if let Err(e) = self
                    .provider
                    .cancel_authorization(&provider_auth.provider_payment_id)
                    .await
                {
                    tracing::error!(
                        provider_payment_id = %provider_auth.provider_payment_id,
                        "Failed to release orphaned hold: {}", e
                    );
                }
                return Err(PaymentError::Conflict(intervention_id.to_string()));
            }
        };

        tracing::info!(
            intervention_id = %intervention_id,
            authorization_id = %auth.id,
            amount = %amount,
            currency = %currency,
            "Payment authorized (manual capture)"
        );
        self.feed.publish(
            EntityType::PaymentAuthorization,
            &auth.id,
            FeedEventKind::PaymentAuthorized,
        );

        Ok(auth)
    }

    // ========================================================================
    // Cancel
    // ========================================================================

    /// Release the intervention's open hold, if one exists
    ///
    /// Idempotent: no open authorization is a successful no-op. A provider
    /// failure is logged and swallowed; the local row is always finalized so
    /// the system never hangs on a provider that already expired the hold.
    pub async fn cancel(&self, intervention_id: &str) -> PaymentResult<Option<PaymentAuthorization>> {
        let Some(open) = self
            .storage
            .open_authorization_for_intervention(intervention_id)?
        else {
            tracing::debug!(
                intervention_id = %intervention_id,
                "Cancel requested with no open authorization, nothing to do"
            );
            return Ok(None);
        };

        self.cancel_open(open).await.map(Some)
    }

    /// Drive an open authorization to a terminal status, starting from a
    /// possibly stale snapshot.
    ///
    /// A CAS conflict means the row moved after the snapshot was taken. A
    /// terminal row is the outcome we wanted; a non-terminal one means an
    /// in-flight authorize finalized mid-cancel and attached provider
    /// references, so the cancellation restarts from the current row and
    /// releases the hold it just learned about. Statuses only move toward
    /// terminal, so the loop is bounded.
    async fn cancel_open(
        &self,
        mut open: PaymentAuthorization,
    ) -> PaymentResult<PaymentAuthorization> {
        loop {
            if let Some(ref provider_payment_id) = open.provider_payment_id {
                if let Err(e) = self.provider.cancel_authorization(provider_payment_id).await {
                    tracing::warn!(
                        intervention_id = %open.intervention_id,
                        provider_payment_id = %provider_payment_id,
                        "Provider-side cancellation failed, finalizing local state anyway: {}", e
                    );
                }
            }

            let txn = self.storage.begin_write()?;
            let transition =
                self.storage
                    .transition_authorization(&txn, &open.id, open.status, |a| {
                        a.status = AuthorizationStatus::Cancelled;
                        a.cancelled_at = Some(util::now_millis());
                    })?;
            match transition {
                Transition::Applied(auth) => {
                    txn.commit().map_err(StorageError::from)?;
                    tracing::info!(
                        intervention_id = %auth.intervention_id,
                        authorization_id = %auth.id,
                        "Payment authorization cancelled"
                    );
                    self.feed.publish(
                        EntityType::PaymentAuthorization,
                        &auth.id,
                        FeedEventKind::PaymentCancelled,
                    );
                    return Ok(auth);
                }
                Transition::Conflict(actual) => {
                    drop(txn);
                    let current = self
                        .storage
                        .get_authorization(&open.id)?
                        .ok_or_else(|| StorageError::AuthorizationNotFound(open.id.clone()))?;
                    if current.status.is_terminal() {
                        tracing::debug!(
                            intervention_id = %open.intervention_id,
                            authorization_id = %open.id,
                            actual_status = %actual,
                            "Authorization already finalized by a concurrent call"
                        );
                        return Ok(current);
                    }
                    tracing::warn!(
                        intervention_id = %open.intervention_id,
                        authorization_id = %open.id,
                        actual_status = %actual,
                        "Authorization moved during cancellation, retrying against the current row"
                    );
                    open = current;
                }
            }
        }
    }

    // ========================================================================
    // Capture
    // ========================================================================

    /// Mark the intervention's hold captured
    ///
    /// The provider-side capture is driven by the external billing flow at
    /// completion; this finalizes the local row under the same
    /// one-open-authorization invariant.
    pub async fn capture(&self, intervention_id: &str) -> PaymentResult<PaymentAuthorization> {
        let open = self
            .storage
            .open_authorization_for_intervention(intervention_id)?
            .filter(|a| a.status == AuthorizationStatus::Authorized)
            .ok_or_else(|| PaymentError::InterventionNotFound(intervention_id.to_string()))?;

        let txn = self.storage.begin_write()?;
        let transition = self.storage.transition_authorization(
            &txn,
            &open.id,
            AuthorizationStatus::Authorized,
            |a| {
                a.status = AuthorizationStatus::Captured;
                a.captured_at = Some(util::now_millis());
            },
        )?;
        let auth = match transition {
            Transition::Applied(auth) => {
                txn.commit().map_err(StorageError::from)?;
                auth
            }
            Transition::Conflict(_) => {
                return Err(PaymentError::Conflict(intervention_id.to_string()));
            }
        };

        tracing::info!(
            intervention_id = %intervention_id,
            authorization_id = %auth.id,
            "Payment captured"
        );
        self.feed.publish(
            EntityType::PaymentAuthorization,
            &auth.id,
            FeedEventKind::PaymentCaptured,
        );

        Ok(auth)
    }
}
