//! DispatchOrchestrator - the assignment state machine per intervention
//!
//! Owns every transition of [`DispatchAttempt`] rows and the dispatch-facing
//! transitions of [`Intervention`] rows: offering to a candidate, handling
//! accept/decline/timeout, escalating to the next candidate, and flagging
//! manual dispatch once the candidate pool is exhausted.
//!
//! # Operation Flow
//!
//! ```text
//! check_timeout(intervention_id)
//!     ├─ 1. Read offer history, pick next candidate (excluding all offered)
//!     ├─ 2. Begin write transaction
//!     ├─ 3. CAS expired attempt PENDING → TIMED_OUT (conflict → no-op)
//!     ├─ 4. Insert fresh PENDING attempt, or flag manual dispatch
//!     ├─ 5. Commit (expire + create are one atomic unit)
//!     └─ 6. Publish feed events
//! ```
//!
//! Two invocations racing on the same intervention cannot both pass step 3:
//! whoever loses the CAS returns [`CheckTimeoutOutcome::AlreadyHandled`].
//! The same CAS discipline applies symmetrically to technician actions, so
//! an accept racing a sweep resolves to exactly one winner.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::dispatch::selector::{CandidateSelector, SelectorError};
use crate::dispatch::storage::{DispatchStorage, StorageError, Transition};
use crate::feed::FeedEmitter;
use shared::dispatch::{AttemptStatus, DispatchAttempt};
use shared::feed::{EntityType, FeedEventKind};
use shared::intervention::{Intervention, InterventionStatus};
use shared::util;

/// Dispatch errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Intervention not found: {0}")]
    InterventionNotFound(String),

    #[error("Attempt not found: {0}")]
    AttemptNotFound(String),

    #[error("Offer {0} is no longer available")]
    OfferNoLongerAvailable(String),

    #[error("Offer {attempt_id} was not made to technician {technician_id}")]
    NotOfferedToTechnician {
        attempt_id: String,
        technician_id: String,
    },

    #[error("Technician {technician_id} is not assigned to intervention {intervention_id}")]
    NotAssignedTechnician {
        intervention_id: String,
        technician_id: String,
    },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: InterventionStatus,
        to: InterventionStatus,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Selector(#[from] SelectorError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Result of one timeout check
#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "outcome")]
pub enum CheckTimeoutOutcome {
    /// The expired offer was closed and the next candidate got a fresh one
    Reassigned {
        expired_attempt_id: String,
        new_attempt: DispatchAttempt,
    },
    /// The expired offer was closed and no candidate remains; the
    /// intervention is flagged for manual dispatch, status stays NEW
    Exhausted { expired_attempt_id: String },
    /// Nothing to do: no expired pending offer, or another invocation won
    /// the CAS first
    AlreadyHandled,
}

/// Dispatch orchestrator
///
/// Stateless between calls; all coordination state lives in storage and is
/// mutated exclusively through conditional (compare-and-swap) updates.
pub struct DispatchOrchestrator {
    storage: DispatchStorage,
    selector: Arc<dyn CandidateSelector>,
    feed: FeedEmitter,
    /// Offer window in milliseconds; fixed per attempt at creation
    offer_window_ms: i64,
}

impl DispatchOrchestrator {
    pub fn new(
        storage: DispatchStorage,
        selector: Arc<dyn CandidateSelector>,
        feed: FeedEmitter,
        offer_window_ms: i64,
    ) -> Self {
        Self {
            storage,
            selector,
            feed,
            offer_window_ms,
        }
    }

    pub fn storage(&self) -> &DispatchStorage {
        &self.storage
    }

    // ========================================================================
    // Intake
    // ========================================================================

    /// Persist a freshly submitted intervention and offer it to the first
    /// eligible candidate. With an empty candidate pool the intervention is
    /// stored flagged for manual dispatch.
    pub async fn begin_dispatch(
        &self,
        mut intervention: Intervention,
    ) -> DispatchResult<(Intervention, Option<DispatchAttempt>)> {
        let candidate = self
            .selector
            .select_next_candidate(&intervention.id, &[])
            .await?;

        let attempt = candidate.map(|technician_id| {
            DispatchAttempt::new(
                util::new_id(),
                intervention.id.clone(),
                technician_id,
                self.offer_window_ms,
            )
        });
        intervention.needs_manual_dispatch = attempt.is_none();

        let txn = self.storage.begin_write()?;
        self.storage.put_intervention(&txn, &intervention)?;
        if let Some(ref attempt) = attempt {
            self.storage.insert_attempt(&txn, attempt)?;
        }
        txn.commit().map_err(StorageError::from)?;

        self.feed.publish(
            EntityType::Intervention,
            &intervention.id,
            FeedEventKind::InterventionCreated,
        );
        match attempt {
            Some(ref attempt) => {
                tracing::info!(
                    intervention_id = %intervention.id,
                    technician_id = %attempt.technician_id,
                    timeout_at = attempt.timeout_at,
                    "Intervention offered to first candidate"
                );
                self.feed.publish(
                    EntityType::DispatchAttempt,
                    &attempt.id,
                    FeedEventKind::AttemptCreated,
                );
            }
            None => {
                tracing::warn!(
                    intervention_id = %intervention.id,
                    "No candidate available at intake, flagged for manual dispatch"
                );
                self.feed.publish(
                    EntityType::Intervention,
                    &intervention.id,
                    FeedEventKind::ManualDispatchRequired,
                );
            }
        }

        Ok((intervention, attempt))
    }

    // ========================================================================
    // Timeout Check
    // ========================================================================

    /// Expire an elapsed offer and escalate to the next candidate.
    ///
    /// Re-verifies under its own read that an expired PENDING attempt exists
    /// (the sweep's snapshot may be stale), then performs the expire + create
    /// sequence as a single write transaction keyed on the prior attempt
    /// still being PENDING. Safe to call concurrently for the same
    /// intervention: exactly one caller applies the transition.
    pub async fn check_timeout(&self, intervention_id: &str) -> DispatchResult<CheckTimeoutOutcome> {
        let intervention = self
            .storage
            .get_intervention(intervention_id)?
            .ok_or_else(|| DispatchError::InterventionNotFound(intervention_id.to_string()))?;

        // Read pass: find the expired offer and pick the next candidate.
        let history = self.storage.attempts_for_intervention(intervention_id)?;
        let now = util::now_millis();
        let Some(expired) = history.iter().find(|a| a.is_expired(now)) else {
            return Ok(CheckTimeoutOutcome::AlreadyHandled);
        };
        let expired_id = expired.id.clone();

        let offered: Vec<String> = history.iter().map(|a| a.technician_id.clone()).collect();
        let candidate = self
            .selector
            .select_next_candidate(intervention_id, &offered)
            .await?;

        // Write pass: expire + create in one transaction, guarded by the CAS
        // on the prior attempt. A concurrent accept/decline/sweep that got
        // there first turns this into a no-op.
        let txn = self.storage.begin_write()?;
        let resolved_at = util::now_millis();
        match self.storage.transition_attempt(
            &txn,
            &expired_id,
            AttemptStatus::Pending,
            AttemptStatus::TimedOut,
            resolved_at,
        )? {
            Transition::Conflict(actual) => {
                tracing::debug!(
                    intervention_id = %intervention_id,
                    attempt_id = %expired_id,
                    actual_status = %actual,
                    "Timeout check lost the race, attempt already resolved"
                );
                // Abort without committing; nothing was written
                return Ok(CheckTimeoutOutcome::AlreadyHandled);
            }
            Transition::Applied(_) => {}
        }

        let outcome = match candidate {
            Some(technician_id) => {
                let attempt = DispatchAttempt::new(
                    util::new_id(),
                    intervention_id.to_string(),
                    technician_id,
                    self.offer_window_ms,
                );
                self.storage.insert_attempt(&txn, &attempt)?;
                CheckTimeoutOutcome::Reassigned {
                    expired_attempt_id: expired_id.clone(),
                    new_attempt: attempt,
                }
            }
            None => {
                let mut intervention = intervention;
                intervention.needs_manual_dispatch = true;
                intervention.updated_at = resolved_at;
                self.storage.put_intervention(&txn, &intervention)?;
                CheckTimeoutOutcome::Exhausted {
                    expired_attempt_id: expired_id.clone(),
                }
            }
        };
        txn.commit().map_err(StorageError::from)?;

        self.feed.publish(
            EntityType::DispatchAttempt,
            &expired_id,
            FeedEventKind::AttemptTimedOut,
        );
        match &outcome {
            CheckTimeoutOutcome::Reassigned { new_attempt, .. } => {
                tracing::info!(
                    intervention_id = %intervention_id,
                    expired_attempt_id = %expired_id,
                    new_attempt_id = %new_attempt.id,
                    technician_id = %new_attempt.technician_id,
                    "Offer timed out, reassigned to next candidate"
                );
                self.feed.publish(
                    EntityType::DispatchAttempt,
                    &new_attempt.id,
                    FeedEventKind::AttemptCreated,
                );
            }
            CheckTimeoutOutcome::Exhausted { .. } => {
                tracing::warn!(
                    intervention_id = %intervention_id,
                    offered_count = offered.len(),
                    "Candidate pool exhausted, flagged for manual dispatch"
                );
                self.feed.publish(
                    EntityType::Intervention,
                    intervention_id,
                    FeedEventKind::ManualDispatchRequired,
                );
            }
            CheckTimeoutOutcome::AlreadyHandled => {}
        }

        Ok(outcome)
    }

    // ========================================================================
    // Technician Actions
    // ========================================================================

    /// Technician accepts an open offer
    ///
    /// The same CAS that guards the sweep guards the human action: an accept
    /// arriving after the sweep consumed the deadline finds the attempt no
    /// longer PENDING and is rejected.
    pub async fn accept(
        &self,
        attempt_id: &str,
        technician_id: &str,
    ) -> DispatchResult<Intervention> {
        let txn = self.storage.begin_write()?;

        let attempt = self
            .storage
            .get_attempt_txn(&txn, attempt_id)?
            .ok_or_else(|| DispatchError::AttemptNotFound(attempt_id.to_string()))?;
        if attempt.technician_id != technician_id {
            return Err(DispatchError::NotOfferedToTechnician {
                attempt_id: attempt_id.to_string(),
                technician_id: technician_id.to_string(),
            });
        }

        let now = util::now_millis();
        match self.storage.transition_attempt(
            &txn,
            attempt_id,
            AttemptStatus::Pending,
            AttemptStatus::Accepted,
            now,
        )? {
            Transition::Conflict(_) => {
                return Err(DispatchError::OfferNoLongerAvailable(attempt_id.to_string()));
            }
            Transition::Applied(_) => {}
        }

        let mut intervention = self
            .storage
            .get_intervention_txn(&txn, &attempt.intervention_id)?
            .ok_or_else(|| {
                DispatchError::InterventionNotFound(attempt.intervention_id.clone())
            })?;
        intervention.status = InterventionStatus::Assigned;
        intervention.technician_id = Some(technician_id.to_string());
        intervention.needs_manual_dispatch = false;
        intervention.updated_at = now;
        self.storage.put_intervention(&txn, &intervention)?;

        txn.commit().map_err(StorageError::from)?;

        tracing::info!(
            intervention_id = %intervention.id,
            attempt_id = %attempt_id,
            technician_id = %technician_id,
            "Offer accepted"
        );
        self.feed.publish(
            EntityType::DispatchAttempt,
            attempt_id,
            FeedEventKind::AttemptAccepted,
        );
        self.feed.publish(
            EntityType::Intervention,
            &intervention.id,
            FeedEventKind::InterventionAssigned,
        );

        Ok(intervention)
    }

    /// Technician declines an open offer; escalates like a timeout
    pub async fn decline(
        &self,
        attempt_id: &str,
        technician_id: &str,
    ) -> DispatchResult<Option<DispatchAttempt>> {
        let attempt = self
            .storage
            .get_attempt(attempt_id)?
            .ok_or_else(|| DispatchError::AttemptNotFound(attempt_id.to_string()))?;
        if attempt.technician_id != technician_id {
            return Err(DispatchError::NotOfferedToTechnician {
                attempt_id: attempt_id.to_string(),
                technician_id: technician_id.to_string(),
            });
        }
        let intervention_id = attempt.intervention_id.clone();

        let history = self.storage.attempts_for_intervention(&intervention_id)?;
        let offered: Vec<String> = history.iter().map(|a| a.technician_id.clone()).collect();
        let candidate = self
            .selector
            .select_next_candidate(&intervention_id, &offered)
            .await?;

        let txn = self.storage.begin_write()?;
        let now = util::now_millis();
        match self.storage.transition_attempt(
            &txn,
            attempt_id,
            AttemptStatus::Pending,
            AttemptStatus::Declined,
            now,
        )? {
            Transition::Conflict(_) => {
                return Err(DispatchError::OfferNoLongerAvailable(attempt_id.to_string()));
            }
            Transition::Applied(_) => {}
        }

        let next_attempt = match candidate {
            Some(next_technician) => {
                let attempt = DispatchAttempt::new(
                    util::new_id(),
                    intervention_id.clone(),
                    next_technician,
                    self.offer_window_ms,
                );
                self.storage.insert_attempt(&txn, &attempt)?;
                Some(attempt)
            }
            None => {
                let mut intervention = self
                    .storage
                    .get_intervention_txn(&txn, &intervention_id)?
                    .ok_or_else(|| DispatchError::InterventionNotFound(intervention_id.clone()))?;
                intervention.needs_manual_dispatch = true;
                intervention.updated_at = now;
                self.storage.put_intervention(&txn, &intervention)?;
                None
            }
        };
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(
            intervention_id = %intervention_id,
            attempt_id = %attempt_id,
            technician_id = %technician_id,
            reoffered = next_attempt.is_some(),
            "Offer declined"
        );
        self.feed.publish(
            EntityType::DispatchAttempt,
            attempt_id,
            FeedEventKind::AttemptDeclined,
        );
        match &next_attempt {
            Some(attempt) => self.feed.publish(
                EntityType::DispatchAttempt,
                &attempt.id,
                FeedEventKind::AttemptCreated,
            ),
            None => self.feed.publish(
                EntityType::Intervention,
                &intervention_id,
                FeedEventKind::ManualDispatchRequired,
            ),
        }

        Ok(next_attempt)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Client cancels an intervention before work is in progress
    ///
    /// Idempotent: cancelling an already cancelled intervention is a no-op.
    /// Any open offer is closed in the same transaction.
    pub async fn cancel_intervention(&self, intervention_id: &str) -> DispatchResult<Intervention> {
        let txn = self.storage.begin_write()?;

        let mut intervention = self
            .storage
            .get_intervention_txn(&txn, intervention_id)?
            .ok_or_else(|| DispatchError::InterventionNotFound(intervention_id.to_string()))?;

        if intervention.status == InterventionStatus::Cancelled {
            return Ok(intervention);
        }
        if !intervention.status.can_cancel() {
            return Err(DispatchError::InvalidTransition {
                from: intervention.status,
                to: InterventionStatus::Cancelled,
            });
        }

        let now = util::now_millis();
        let cancelled_attempt = match self
            .storage
            .pending_attempt_for_intervention_txn(&txn, intervention_id)?
        {
            Some(pending) => {
                match self.storage.transition_attempt(
                    &txn,
                    &pending.id,
                    AttemptStatus::Pending,
                    AttemptStatus::Cancelled,
                    now,
                )? {
                    Transition::Applied(_) => Some(pending.id),
                    // Same transaction as the read above; cannot conflict
                    Transition::Conflict(_) => None,
                }
            }
            None => None,
        };

        intervention.status = InterventionStatus::Cancelled;
        intervention.technician_id = None;
        intervention.needs_manual_dispatch = false;
        intervention.active = false;
        intervention.updated_at = now;
        self.storage.put_intervention(&txn, &intervention)?;

        txn.commit().map_err(StorageError::from)?;

        tracing::info!(intervention_id = %intervention_id, "Intervention cancelled");
        if let Some(attempt_id) = cancelled_attempt {
            self.feed.publish(
                EntityType::DispatchAttempt,
                &attempt_id,
                FeedEventKind::AttemptCancelled,
            );
        }
        self.feed.publish(
            EntityType::Intervention,
            intervention_id,
            FeedEventKind::InterventionCancelled,
        );

        Ok(intervention)
    }

    /// Technician progresses the intervention along the allowed chain
    /// (ASSIGNED → EN_ROUTE → IN_PROGRESS → COMPLETED)
    pub async fn progress(
        &self,
        intervention_id: &str,
        technician_id: &str,
        to: InterventionStatus,
    ) -> DispatchResult<Intervention> {
        let txn = self.storage.begin_write()?;

        let mut intervention = self
            .storage
            .get_intervention_txn(&txn, intervention_id)?
            .ok_or_else(|| DispatchError::InterventionNotFound(intervention_id.to_string()))?;

        if intervention.technician_id.as_deref() != Some(technician_id) {
            return Err(DispatchError::NotAssignedTechnician {
                intervention_id: intervention_id.to_string(),
                technician_id: technician_id.to_string(),
            });
        }
        if !intervention.status.can_progress_to(to) {
            return Err(DispatchError::InvalidTransition {
                from: intervention.status,
                to,
            });
        }

        let now = util::now_millis();
        match to {
            InterventionStatus::InProgress => intervention.started_at = Some(now),
            InterventionStatus::Completed => {
                intervention.completed_at = Some(now);
                intervention.active = false;
            }
            _ => {}
        }
        intervention.status = to;
        intervention.updated_at = now;
        self.storage.put_intervention(&txn, &intervention)?;
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(
            intervention_id = %intervention_id,
            technician_id = %technician_id,
            status = %to,
            "Intervention status progressed"
        );
        self.feed.publish(
            EntityType::Intervention,
            intervention_id,
            FeedEventKind::InterventionStatusChanged,
        );

        Ok(intervention)
    }
}
