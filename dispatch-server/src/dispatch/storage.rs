//! redb-based storage layer for dispatch state
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `interventions` | `intervention_id` | `Intervention` | Service requests |
//! | `dispatch_attempts` | `attempt_id` | `DispatchAttempt` | Offer history (append + single status transition) |
//! | `attempts_by_intervention` | `(intervention_id, attempt_id)` | `()` | Attempt index |
//! | `pending_offers` | `attempt_id` | `PendingOffer` | Open-offer index for the timeout sweep |
//! | `payment_authorizations` | `authorization_id` | `PaymentAuthorization` | Fund holds |
//! | `auths_by_intervention` | `(intervention_id, authorization_id)` | `()` | Authorization index |
//!
//! # Concurrency
//!
//! All coordination state lives here. Every status transition is a
//! compare-and-swap: the row is re-read inside the write transaction and
//! only written if its current status matches the expected prior status.
//! A failed check is reported as [`Transition::Conflict`], which callers
//! treat as "another invocation already handled this" rather than an error.
//!
//! # Durability
//!
//! redb commits with `Durability::Immediate`: copy-on-write with an atomic
//! pointer swap, so the database file stays consistent across crashes.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use shared::dispatch::{AttemptStatus, DispatchAttempt};
use shared::intervention::Intervention;
use shared::payment::{AuthorizationStatus, PaymentAuthorization};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Table for interventions: key = intervention_id, value = JSON-serialized Intervention
const INTERVENTIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("interventions");

/// Table for dispatch attempts: key = attempt_id, value = JSON-serialized DispatchAttempt
const ATTEMPTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("dispatch_attempts");

/// Index of attempts per intervention: key = (intervention_id, attempt_id)
const ATTEMPTS_BY_INTERVENTION_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("attempts_by_intervention");

/// Open-offer index scanned by the timeout sweep: key = attempt_id, value = JSON PendingOffer
const PENDING_OFFERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_offers");

/// Table for payment authorizations: key = authorization_id, value = JSON PaymentAuthorization
const AUTHORIZATIONS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("payment_authorizations");

/// Index of authorizations per intervention: key = (intervention_id, authorization_id)
const AUTHS_BY_INTERVENTION_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("auths_by_intervention");

/// Entry in the open-offer index
///
/// Carries just enough for the sweep to group expired offers by
/// intervention without deserializing full attempt rows.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PendingOffer {
    pub attempt_id: String,
    pub intervention_id: String,
    pub timeout_at: i64,
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Intervention not found: {0}")]
    InterventionNotFound(String),

    #[error("Attempt not found: {0}")]
    AttemptNotFound(String),

    #[error("Authorization not found: {0}")]
    AuthorizationNotFound(String),

    #[error("Intervention {0} already has a pending attempt")]
    PendingAttemptExists(String),

    #[error("Intervention {0} already has an open authorization")]
    OpenAuthorizationExists(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of a compare-and-swap status transition
#[derive(Debug)]
pub enum Transition<T, S> {
    /// Expected prior status matched; the row was rewritten
    Applied(T),
    /// Another invocation already moved the row; contains the status found
    Conflict(S),
}

impl<T, S> Transition<T, S> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// Dispatch storage backed by redb
#[derive(Clone)]
pub struct DispatchStorage {
    db: Arc<Database>,
}

impl DispatchStorage {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    fn init_tables(&self) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(INTERVENTIONS_TABLE)?;
            let _ = write_txn.open_table(ATTEMPTS_TABLE)?;
            let _ = write_txn.open_table(ATTEMPTS_BY_INTERVENTION_TABLE)?;
            let _ = write_txn.open_table(PENDING_OFFERS_TABLE)?;
            let _ = write_txn.open_table(AUTHORIZATIONS_TABLE)?;
            let _ = write_txn.open_table(AUTHS_BY_INTERVENTION_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    // ========== Intervention Operations ==========

    /// Store (insert or overwrite) an intervention
    pub fn put_intervention(
        &self,
        txn: &WriteTransaction,
        intervention: &Intervention,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(INTERVENTIONS_TABLE)?;
        let value = serde_json::to_vec(intervention)?;
        table.insert(intervention.id.as_str(), value.as_slice())?;
        Ok(())
    }

    /// Get an intervention by ID
    pub fn get_intervention(&self, id: &str) -> StorageResult<Option<Intervention>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(INTERVENTIONS_TABLE)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Get an intervention by ID (within transaction)
    pub fn get_intervention_txn(
        &self,
        txn: &WriteTransaction,
        id: &str,
    ) -> StorageResult<Option<Intervention>> {
        let table = txn.open_table(INTERVENTIONS_TABLE)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    // ========== Attempt Operations ==========

    /// Insert a new dispatch attempt and index it
    ///
    /// Refuses to create a second pending attempt for the same intervention:
    /// the at-most-one-pending invariant is enforced here, inside the write
    /// transaction, not by callers.
    pub fn insert_attempt(
        &self,
        txn: &WriteTransaction,
        attempt: &DispatchAttempt,
    ) -> StorageResult<()> {
        if attempt.status == AttemptStatus::Pending
            && self
                .pending_attempt_for_intervention_txn(txn, &attempt.intervention_id)?
                .is_some()
        {
            return Err(StorageError::PendingAttemptExists(
                attempt.intervention_id.clone(),
            ));
        }

        let mut attempts = txn.open_table(ATTEMPTS_TABLE)?;
        let value = serde_json::to_vec(attempt)?;
        attempts.insert(attempt.id.as_str(), value.as_slice())?;
        drop(attempts);

        let mut index = txn.open_table(ATTEMPTS_BY_INTERVENTION_TABLE)?;
        index.insert((attempt.intervention_id.as_str(), attempt.id.as_str()), ())?;
        drop(index);

        if attempt.status == AttemptStatus::Pending {
            let mut pending = txn.open_table(PENDING_OFFERS_TABLE)?;
            let offer = PendingOffer {
                attempt_id: attempt.id.clone(),
                intervention_id: attempt.intervention_id.clone(),
                timeout_at: attempt.timeout_at,
            };
            let value = serde_json::to_vec(&offer)?;
            pending.insert(attempt.id.as_str(), value.as_slice())?;
        }

        Ok(())
    }

    /// Get an attempt by ID
    pub fn get_attempt(&self, id: &str) -> StorageResult<Option<DispatchAttempt>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ATTEMPTS_TABLE)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Get an attempt by ID (within transaction)
    pub fn get_attempt_txn(
        &self,
        txn: &WriteTransaction,
        id: &str,
    ) -> StorageResult<Option<DispatchAttempt>> {
        let table = txn.open_table(ATTEMPTS_TABLE)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All attempts ever created for an intervention (offer history)
    pub fn attempts_for_intervention(
        &self,
        intervention_id: &str,
    ) -> StorageResult<Vec<DispatchAttempt>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ATTEMPTS_BY_INTERVENTION_TABLE)?;
        let attempts_table = read_txn.open_table(ATTEMPTS_TABLE)?;

        let mut attempts = Vec::new();
        let range_start = (intervention_id, "");
        let range_end = (intervention_id, "\u{10FFFF}");
        for result in index.range(range_start..=range_end)? {
            let (key, _value) = result?;
            let (_intervention_id, attempt_id) = key.value();
            if let Some(value) = attempts_table.get(attempt_id)? {
                attempts.push(serde_json::from_slice(value.value())?);
            }
        }

        attempts.sort_by_key(|a: &DispatchAttempt| a.created_at);
        Ok(attempts)
    }

    /// Offer history (within transaction)
    pub fn attempts_for_intervention_txn(
        &self,
        txn: &WriteTransaction,
        intervention_id: &str,
    ) -> StorageResult<Vec<DispatchAttempt>> {
        let index = txn.open_table(ATTEMPTS_BY_INTERVENTION_TABLE)?;
        let attempts_table = txn.open_table(ATTEMPTS_TABLE)?;

        let mut attempts = Vec::new();
        let range_start = (intervention_id, "");
        let range_end = (intervention_id, "\u{10FFFF}");
        for result in index.range(range_start..=range_end)? {
            let (key, _value) = result?;
            let (_intervention_id, attempt_id) = key.value();
            if let Some(value) = attempts_table.get(attempt_id)? {
                attempts.push(serde_json::from_slice(value.value())?);
            }
        }

        attempts.sort_by_key(|a: &DispatchAttempt| a.created_at);
        Ok(attempts)
    }

    /// The pending attempt for an intervention, if any (within transaction)
    pub fn pending_attempt_for_intervention_txn(
        &self,
        txn: &WriteTransaction,
        intervention_id: &str,
    ) -> StorageResult<Option<DispatchAttempt>> {
        Ok(self
            .attempts_for_intervention_txn(txn, intervention_id)?
            .into_iter()
            .find(|a| a.status == AttemptStatus::Pending))
    }

    /// Compare-and-swap an attempt's status
    ///
    /// Rewrites the row only if its current status equals `expected`.
    /// Leaving `Pending` also removes the row from the open-offer index, in
    /// the same transaction, so the sweep can never see a half-transitioned
    /// offer.
    pub fn transition_attempt(
        &self,
        txn: &WriteTransaction,
        attempt_id: &str,
        expected: AttemptStatus,
        to: AttemptStatus,
        resolved_at: i64,
    ) -> StorageResult<Transition<DispatchAttempt, AttemptStatus>> {
        let mut attempt = self
            .get_attempt_txn(txn, attempt_id)?
            .ok_or_else(|| StorageError::AttemptNotFound(attempt_id.to_string()))?;

        if attempt.status != expected {
            return Ok(Transition::Conflict(attempt.status));
        }

        attempt.status = to;
        attempt.resolved_at = Some(resolved_at);

        let mut attempts = txn.open_table(ATTEMPTS_TABLE)?;
        let value = serde_json::to_vec(&attempt)?;
        attempts.insert(attempt_id, value.as_slice())?;
        drop(attempts);

        if expected == AttemptStatus::Pending {
            let mut pending = txn.open_table(PENDING_OFFERS_TABLE)?;
            pending.remove(attempt_id)?;
        }

        Ok(Transition::Applied(attempt))
    }

    /// Open offers whose deadline elapsed before `now`
    ///
    /// Read-only; the sweep resolves each hit through [`transition_attempt`]
    /// under its own write transaction.
    pub fn expired_pending_offers(&self, now: i64) -> StorageResult<Vec<PendingOffer>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_OFFERS_TABLE)?;

        let mut expired = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            let offer: PendingOffer = serde_json::from_slice(value.value())?;
            if offer.timeout_at < now {
                expired.push(offer);
            }
        }

        Ok(expired)
    }

    // ========== Payment Authorization Operations ==========

    /// Insert a new authorization and index it
    ///
    /// Enforces the one-open-authorization-per-intervention invariant.
    pub fn insert_authorization(
        &self,
        txn: &WriteTransaction,
        auth: &PaymentAuthorization,
    ) -> StorageResult<()> {
        if self
            .open_authorization_for_intervention_txn(txn, &auth.intervention_id)?
            .is_some()
        {
            return Err(StorageError::OpenAuthorizationExists(
                auth.intervention_id.clone(),
            ));
        }

        let mut auths = txn.open_table(AUTHORIZATIONS_TABLE)?;
        let value = serde_json::to_vec(auth)?;
        auths.insert(auth.id.as_str(), value.as_slice())?;
        drop(auths);

        let mut index = txn.open_table(AUTHS_BY_INTERVENTION_TABLE)?;
        index.insert((auth.intervention_id.as_str(), auth.id.as_str()), ())?;

        Ok(())
    }

    /// Overwrite an existing authorization row
    pub fn put_authorization(
        &self,
        txn: &WriteTransaction,
        auth: &PaymentAuthorization,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(AUTHORIZATIONS_TABLE)?;
        let value = serde_json::to_vec(auth)?;
        table.insert(auth.id.as_str(), value.as_slice())?;
        Ok(())
    }

    /// Get an authorization by ID
    pub fn get_authorization(&self, id: &str) -> StorageResult<Option<PaymentAuthorization>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUTHORIZATIONS_TABLE)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All authorizations for an intervention, oldest first
    pub fn authorizations_for_intervention_txn(
        &self,
        txn: &WriteTransaction,
        intervention_id: &str,
    ) -> StorageResult<Vec<PaymentAuthorization>> {
        let index = txn.open_table(AUTHS_BY_INTERVENTION_TABLE)?;
        let auths_table = txn.open_table(AUTHORIZATIONS_TABLE)?;

        let mut auths = Vec::new();
        let range_start = (intervention_id, "");
        let range_end = (intervention_id, "\u{10FFFF}");
        for result in index.range(range_start..=range_end)? {
            let (key, _value) = result?;
            let (_intervention_id, auth_id) = key.value();
            if let Some(value) = auths_table.get(auth_id)? {
                auths.push(serde_json::from_slice(value.value())?);
            }
        }

        auths.sort_by_key(|a: &PaymentAuthorization| a.created_at);
        Ok(auths)
    }

    /// Most recent non-terminal (PENDING/AUTHORIZED) authorization, if any
    pub fn open_authorization_for_intervention(
        &self,
        intervention_id: &str,
    ) -> StorageResult<Option<PaymentAuthorization>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(AUTHS_BY_INTERVENTION_TABLE)?;
        let auths_table = read_txn.open_table(AUTHORIZATIONS_TABLE)?;

        let mut auths: Vec<PaymentAuthorization> = Vec::new();
        let range_start = (intervention_id, "");
        let range_end = (intervention_id, "\u{10FFFF}");
        for result in index.range(range_start..=range_end)? {
            let (key, _value) = result?;
            let (_intervention_id, auth_id) = key.value();
            if let Some(value) = auths_table.get(auth_id)? {
                auths.push(serde_json::from_slice(value.value())?);
            }
        }

        auths.sort_by_key(|a| a.created_at);
        Ok(auths.into_iter().rev().find(|a| !a.status.is_terminal()))
    }

    /// Most recent non-terminal authorization (within transaction)
    pub fn open_authorization_for_intervention_txn(
        &self,
        txn: &WriteTransaction,
        intervention_id: &str,
    ) -> StorageResult<Option<PaymentAuthorization>> {
        Ok(self
            .authorizations_for_intervention_txn(txn, intervention_id)?
            .into_iter()
            .rev()
            .find(|a| !a.status.is_terminal()))
    }

    /// Compare-and-swap an authorization's status
    pub fn transition_authorization(
        &self,
        txn: &WriteTransaction,
        auth_id: &str,
        expected: AuthorizationStatus,
        apply: impl FnOnce(&mut PaymentAuthorization),
    ) -> StorageResult<Transition<PaymentAuthorization, AuthorizationStatus>> {
        let table = txn.open_table(AUTHORIZATIONS_TABLE)?;
        let mut auth: PaymentAuthorization = match table.get(auth_id)? {
            Some(value) => serde_json::from_slice(value.value())?,
            None => return Err(StorageError::AuthorizationNotFound(auth_id.to_string())),
        };
        drop(table);

        if auth.status != expected {
            return Ok(Transition::Conflict(auth.status));
        }

        apply(&mut auth);
        self.put_authorization(txn, &auth)?;
        Ok(Transition::Applied(auth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::intervention::{Priority, ServiceCategory};
    use shared::util;

    fn test_intervention(id: &str) -> Intervention {
        Intervention::new(
            id.to_string(),
            "client-1".to_string(),
            ServiceCategory::Plumbing,
            Priority::Urgent,
            "12 Rue des Lilas, Lyon".to_string(),
        )
    }

    fn pending_attempt(id: &str, intervention_id: &str, technician_id: &str) -> DispatchAttempt {
        DispatchAttempt::new(
            id.to_string(),
            intervention_id.to_string(),
            technician_id.to_string(),
            120_000,
        )
    }

    #[test]
    fn put_and_get_intervention_roundtrip() {
        let storage = DispatchStorage::open_in_memory().unwrap();
        let intervention = test_intervention("i-1");

        let txn = storage.begin_write().unwrap();
        storage.put_intervention(&txn, &intervention).unwrap();
        txn.commit().unwrap();

        let loaded = storage.get_intervention("i-1").unwrap().unwrap();
        assert_eq!(loaded, intervention);
        assert!(storage.get_intervention("i-2").unwrap().is_none());
    }

    #[test]
    fn storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.db");
        let intervention = test_intervention("i-1");

        {
            let storage = DispatchStorage::open(&path).unwrap();
            let txn = storage.begin_write().unwrap();
            storage.put_intervention(&txn, &intervention).unwrap();
            storage
                .insert_attempt(&txn, &pending_attempt("a-1", "i-1", "t-1"))
                .unwrap();
            txn.commit().unwrap();
        }

        let storage = DispatchStorage::open(&path).unwrap();
        assert_eq!(
            storage.get_intervention("i-1").unwrap().unwrap(),
            intervention
        );
        assert_eq!(storage.attempts_for_intervention("i-1").unwrap().len(), 1);
    }

    #[test]
    fn second_pending_attempt_for_same_intervention_is_refused() {
        let storage = DispatchStorage::open_in_memory().unwrap();

        let txn = storage.begin_write().unwrap();
        storage
            .insert_attempt(&txn, &pending_attempt("a-1", "i-1", "t-1"))
            .unwrap();
        let err = storage
            .insert_attempt(&txn, &pending_attempt("a-2", "i-1", "t-2"))
            .unwrap_err();
        assert!(matches!(err, StorageError::PendingAttemptExists(_)));

        // A different intervention is unaffected
        storage
            .insert_attempt(&txn, &pending_attempt("a-3", "i-2", "t-1"))
            .unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn transition_applies_once_and_conflicts_after() {
        let storage = DispatchStorage::open_in_memory().unwrap();

        let txn = storage.begin_write().unwrap();
        storage
            .insert_attempt(&txn, &pending_attempt("a-1", "i-1", "t-1"))
            .unwrap();
        txn.commit().unwrap();

        let now = util::now_millis();

        let txn = storage.begin_write().unwrap();
        let first = storage
            .transition_attempt(&txn, "a-1", AttemptStatus::Pending, AttemptStatus::TimedOut, now)
            .unwrap();
        assert!(first.is_applied());
        txn.commit().unwrap();

        // Same CAS again: the row is no longer pending
        let txn = storage.begin_write().unwrap();
        let second = storage
            .transition_attempt(&txn, "a-1", AttemptStatus::Pending, AttemptStatus::Accepted, now)
            .unwrap();
        match second {
            Transition::Conflict(actual) => assert_eq!(actual, AttemptStatus::TimedOut),
            Transition::Applied(_) => panic!("second transition must conflict"),
        }
        txn.commit().unwrap();

        let attempt = storage.get_attempt("a-1").unwrap().unwrap();
        assert_eq!(attempt.status, AttemptStatus::TimedOut);
        assert_eq!(attempt.resolved_at, Some(now));
    }

    #[test]
    fn leaving_pending_clears_the_offer_index() {
        let storage = DispatchStorage::open_in_memory().unwrap();

        let mut attempt = pending_attempt("a-1", "i-1", "t-1");
        attempt.timeout_at = util::now_millis() - 1_000; // already elapsed

        let txn = storage.begin_write().unwrap();
        storage.insert_attempt(&txn, &attempt).unwrap();
        txn.commit().unwrap();

        let expired = storage.expired_pending_offers(util::now_millis()).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].attempt_id, "a-1");

        let txn = storage.begin_write().unwrap();
        storage
            .transition_attempt(
                &txn,
                "a-1",
                AttemptStatus::Pending,
                AttemptStatus::TimedOut,
                util::now_millis(),
            )
            .unwrap();
        txn.commit().unwrap();

        assert!(storage
            .expired_pending_offers(util::now_millis())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn expired_offers_exclude_future_deadlines() {
        let storage = DispatchStorage::open_in_memory().unwrap();

        let fresh = pending_attempt("a-1", "i-1", "t-1");
        let mut stale = pending_attempt("a-2", "i-2", "t-2");
        stale.timeout_at = util::now_millis() - 5_000;

        let txn = storage.begin_write().unwrap();
        storage.insert_attempt(&txn, &fresh).unwrap();
        storage.insert_attempt(&txn, &stale).unwrap();
        txn.commit().unwrap();

        let expired = storage.expired_pending_offers(util::now_millis()).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].intervention_id, "i-2");
    }

    #[test]
    fn attempt_history_is_ordered_by_creation() {
        let storage = DispatchStorage::open_in_memory().unwrap();

        let mut first = pending_attempt("a-1", "i-1", "t-1");
        first.status = AttemptStatus::TimedOut;
        first.created_at -= 10_000;
        let second = pending_attempt("a-2", "i-1", "t-2");

        let txn = storage.begin_write().unwrap();
        storage.insert_attempt(&txn, &first).unwrap();
        storage.insert_attempt(&txn, &second).unwrap();

        let history = storage.attempts_for_intervention_txn(&txn, "i-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, "a-1");
        assert_eq!(history[1].id, "a-2");

        let pending = storage
            .pending_attempt_for_intervention_txn(&txn, "i-1")
            .unwrap()
            .unwrap();
        assert_eq!(pending.id, "a-2");
        txn.commit().unwrap();
    }

    #[test]
    fn second_open_authorization_is_refused() {
        let storage = DispatchStorage::open_in_memory().unwrap();
        let auth = PaymentAuthorization::new(
            "p-1".to_string(),
            "i-1".to_string(),
            rust_decimal::Decimal::new(12000, 2),
            "EUR".to_string(),
        );

        let txn = storage.begin_write().unwrap();
        storage.insert_authorization(&txn, &auth).unwrap();

        let mut dup = auth.clone();
        dup.id = "p-2".to_string();
        let err = storage.insert_authorization(&txn, &dup).unwrap_err();
        assert!(matches!(err, StorageError::OpenAuthorizationExists(_)));
        txn.commit().unwrap();
    }

    #[test]
    fn open_authorization_skips_terminal_rows() {
        let storage = DispatchStorage::open_in_memory().unwrap();
        let mut cancelled = PaymentAuthorization::new(
            "p-1".to_string(),
            "i-1".to_string(),
            rust_decimal::Decimal::new(8000, 2),
            "EUR".to_string(),
        );
        cancelled.status = AuthorizationStatus::Cancelled;
        cancelled.created_at -= 60_000;

        let open = PaymentAuthorization::new(
            "p-2".to_string(),
            "i-1".to_string(),
            rust_decimal::Decimal::new(12000, 2),
            "EUR".to_string(),
        );

        let txn = storage.begin_write().unwrap();
        // Terminal rows are written directly; only open rows go through insert_authorization
        storage.put_authorization(&txn, &cancelled).unwrap();
        let mut index = txn.open_table(AUTHS_BY_INTERVENTION_TABLE).unwrap();
        index.insert(("i-1", "p-1"), ()).unwrap();
        drop(index);
        storage.insert_authorization(&txn, &open).unwrap();

        let found = storage
            .open_authorization_for_intervention_txn(&txn, "i-1")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "p-2");
        txn.commit().unwrap();
    }
}
