//! Dispatch timeout scanner
//!
//! Periodic sweep over the open-offer index: finds offers whose window
//! elapsed without a technician response and triggers the orchestrator's
//! timeout check exactly once per affected intervention.
//!
//! The sweep itself never mutates anything; all writes happen inside the
//! orchestrator's conditional transactions, so overlapping sweeps (or a
//! sweep racing a technician action) are safe and the whole pass is
//! re-runnable.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::dispatch::orchestrator::{CheckTimeoutOutcome, DispatchOrchestrator};
use crate::dispatch::storage::StorageResult;
use shared::util;

/// Result of one timeout check within a sweep
#[derive(Debug, Serialize)]
pub struct InterventionScanResult {
    pub intervention_id: String,
    #[serde(flatten)]
    pub outcome: Option<CheckTimeoutOutcome>,
    /// Set when the orchestrator call failed; the rest of the batch still ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Report for one full sweep
#[derive(Debug, Serialize)]
pub struct ScanReport {
    /// Distinct interventions processed in this pass
    pub processed_count: usize,
    pub results: Vec<InterventionScanResult>,
}

/// Timeout scanner
///
/// Registered as a `TaskKind::Periodic` background task; also invocable on
/// demand through `POST /api/dispatch/scan` for deployments that drive the
/// cadence externally.
pub struct TimeoutScanner {
    orchestrator: Arc<DispatchOrchestrator>,
    shutdown: CancellationToken,
    interval: Duration,
}

impl TimeoutScanner {
    pub fn new(
        orchestrator: Arc<DispatchOrchestrator>,
        shutdown: CancellationToken,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            shutdown,
            interval,
        }
    }

    /// Main loop: sweep on a fixed cadence until shutdown
    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Timeout scanner started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Timeout scanner received shutdown signal");
                    break;
                }
            }

            match scan_once(&self.orchestrator).await {
                Ok(report) if report.processed_count > 0 => {
                    tracing::info!(
                        processed = report.processed_count,
                        "Timeout sweep completed"
                    );
                }
                Ok(_) => {
                    tracing::debug!("Timeout sweep completed, nothing expired");
                }
                Err(e) => {
                    tracing::error!("Timeout sweep failed to read open offers: {}", e);
                }
            }
        }

        tracing::info!("Timeout scanner stopped");
    }
}

/// Run one sweep: query elapsed offers, group by intervention, check each
/// intervention exactly once.
///
/// Per-intervention failures are caught and recorded; one bad record never
/// aborts the batch. The only fallible path out of this function is the
/// initial index read.
pub async fn scan_once(orchestrator: &DispatchOrchestrator) -> StorageResult<ScanReport> {
    let now = util::now_millis();
    let expired = orchestrator.storage().expired_pending_offers(now)?;

    // One check per intervention, even if (through corrupted data) several
    // pending rows exist for it.
    let mut intervention_ids: Vec<String> =
        expired.into_iter().map(|o| o.intervention_id).collect();
    intervention_ids.sort();
    intervention_ids.dedup();

    let mut results = Vec::with_capacity(intervention_ids.len());
    for intervention_id in intervention_ids {
        match orchestrator.check_timeout(&intervention_id).await {
            Ok(outcome) => {
                results.push(InterventionScanResult {
                    intervention_id,
                    outcome: Some(outcome),
                    error: None,
                });
            }
            Err(e) => {
                tracing::error!(
                    intervention_id = %intervention_id,
                    "Timeout check failed: {}", e
                );
                results.push(InterventionScanResult {
                    intervention_id,
                    outcome: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    Ok(ScanReport {
        processed_count: results.len(),
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::selector::{CandidateSelector, SelectorError, StaticRoster};
    use crate::dispatch::storage::DispatchStorage;
    use crate::feed::FeedEmitter;
    use async_trait::async_trait;
    use shared::dispatch::{AttemptStatus, DispatchAttempt};
    use shared::intervention::{Intervention, Priority, ServiceCategory};

    const OFFER_WINDOW_MS: i64 = 120_000;

    fn orchestrator_with(
        storage: DispatchStorage,
        selector: Arc<dyn CandidateSelector>,
    ) -> Arc<DispatchOrchestrator> {
        Arc::new(DispatchOrchestrator::new(
            storage,
            selector,
            FeedEmitter::new(),
            OFFER_WINDOW_MS,
        ))
    }

    fn seed_expired_offer(storage: &DispatchStorage, intervention_id: &str, technician_id: &str) {
        let intervention = Intervention::new(
            intervention_id.to_string(),
            "client-1".to_string(),
            ServiceCategory::Electricity,
            Priority::Normal,
            "8 Calle Mayor, Madrid".to_string(),
        );
        let mut attempt = DispatchAttempt::new(
            util::new_id(),
            intervention_id.to_string(),
            technician_id.to_string(),
            OFFER_WINDOW_MS,
        );
        attempt.created_at -= OFFER_WINDOW_MS + 1_000;
        attempt.timeout_at -= OFFER_WINDOW_MS + 1_000;

        let txn = storage.begin_write().unwrap();
        storage.put_intervention(&txn, &intervention).unwrap();
        storage.insert_attempt(&txn, &attempt).unwrap();
        txn.commit().unwrap();
    }

    #[tokio::test]
    async fn sweep_processes_each_expired_intervention_once() {
        let storage = DispatchStorage::open_in_memory().unwrap();
        seed_expired_offer(&storage, "i-1", "t-1");
        seed_expired_offer(&storage, "i-2", "t-1");
        let orchestrator = orchestrator_with(
            storage,
            Arc::new(StaticRoster::new(vec!["t-1".to_string(), "t-2".to_string()])),
        );

        let report = scan_once(&orchestrator).await.unwrap();

        assert_eq!(report.processed_count, 2);
        assert!(report.results.iter().all(|r| r.error.is_none()));
        assert!(report
            .results
            .iter()
            .all(|r| matches!(r.outcome, Some(CheckTimeoutOutcome::Reassigned { .. }))));
    }

    #[tokio::test]
    async fn sweep_with_nothing_expired_is_empty() {
        let storage = DispatchStorage::open_in_memory().unwrap();
        let orchestrator = orchestrator_with(
            storage,
            Arc::new(StaticRoster::new(vec!["t-1".to_string()])),
        );

        let report = scan_once(&orchestrator).await.unwrap();
        assert_eq!(report.processed_count, 0);
        assert!(report.results.is_empty());
    }

    // An immediate second sweep performs zero effective mutations
    #[tokio::test]
    async fn second_sweep_is_idempotent() {
        let storage = DispatchStorage::open_in_memory().unwrap();
        seed_expired_offer(&storage, "i-1", "t-1");
        let orchestrator = orchestrator_with(
            storage.clone(),
            Arc::new(StaticRoster::new(vec!["t-1".to_string(), "t-2".to_string()])),
        );

        let first = scan_once(&orchestrator).await.unwrap();
        assert_eq!(first.processed_count, 1);

        let snapshot = storage.attempts_for_intervention("i-1").unwrap();

        let second = scan_once(&orchestrator).await.unwrap();
        assert_eq!(second.processed_count, 0);

        assert_eq!(storage.attempts_for_intervention("i-1").unwrap(), snapshot);
    }

    /// Selector that fails for one specific intervention
    struct FaultySelector {
        poisoned_intervention: String,
        fallback: StaticRoster,
    }

    #[async_trait]
    impl CandidateSelector for FaultySelector {
        async fn select_next_candidate(
            &self,
            intervention_id: &str,
            excluded: &[String],
        ) -> Result<Option<String>, SelectorError> {
            if intervention_id == self.poisoned_intervention {
                return Err(SelectorError::Unavailable("ranking service down".to_string()));
            }
            self.fallback.select_next_candidate(intervention_id, excluded).await
        }
    }

    #[tokio::test]
    async fn one_failing_intervention_does_not_abort_the_batch() {
        let storage = DispatchStorage::open_in_memory().unwrap();
        seed_expired_offer(&storage, "i-bad", "t-1");
        seed_expired_offer(&storage, "i-good", "t-1");
        let orchestrator = orchestrator_with(
            storage.clone(),
            Arc::new(FaultySelector {
                poisoned_intervention: "i-bad".to_string(),
                fallback: StaticRoster::new(vec!["t-1".to_string(), "t-2".to_string()]),
            }),
        );

        let report = scan_once(&orchestrator).await.unwrap();
        assert_eq!(report.processed_count, 2);

        let bad = report
            .results
            .iter()
            .find(|r| r.intervention_id == "i-bad")
            .unwrap();
        assert!(bad.error.is_some());

        let good = report
            .results
            .iter()
            .find(|r| r.intervention_id == "i-good")
            .unwrap();
        assert!(good.error.is_none());

        // The healthy intervention was reassigned despite the failure
        let history = storage.attempts_for_intervention("i-good").unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().any(|a| a.status == AttemptStatus::Pending));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let storage = DispatchStorage::open_in_memory().unwrap();
        let orchestrator =
            orchestrator_with(storage, Arc::new(StaticRoster::new(vec![])));
        let shutdown = CancellationToken::new();
        let scanner = TimeoutScanner::new(
            orchestrator,
            shutdown.clone(),
            Duration::from_secs(3600),
        );

        let handle = tokio::spawn(scanner.run());
        shutdown.cancel();
        handle.await.unwrap();
    }
}
