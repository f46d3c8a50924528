//! Candidate selection seam
//!
//! Ranking policy (proximity, availability, skill match) lives behind the
//! [`CandidateSelector`] trait; the orchestrator only ever asks for "the
//! next technician not yet offered this intervention". [`StaticRoster`] is
//! the bundled implementation: a fixed ordered roster, good enough for
//! single-region deployments and for tests.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("Selector unavailable: {0}")]
    Unavailable(String),
}

/// Pure query: the next eligible technician for an intervention
#[async_trait]
pub trait CandidateSelector: Send + Sync {
    /// Returns `None` when every eligible candidate has already been offered
    /// the intervention.
    async fn select_next_candidate(
        &self,
        intervention_id: &str,
        excluded_technician_ids: &[String],
    ) -> Result<Option<String>, SelectorError>;
}

/// Fixed ordered roster of technician IDs
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    technicians: Vec<String>,
}

impl StaticRoster {
    pub fn new(technicians: Vec<String>) -> Self {
        Self { technicians }
    }
}

#[async_trait]
impl CandidateSelector for StaticRoster {
    async fn select_next_candidate(
        &self,
        _intervention_id: &str,
        excluded_technician_ids: &[String],
    ) -> Result<Option<String>, SelectorError> {
        Ok(self
            .technicians
            .iter()
            .find(|t| !excluded_technician_ids.contains(t))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roster_skips_excluded_technicians() {
        let roster = StaticRoster::new(vec![
            "t-1".to_string(),
            "t-2".to_string(),
            "t-3".to_string(),
        ]);

        let next = roster.select_next_candidate("i-1", &[]).await.unwrap();
        assert_eq!(next.as_deref(), Some("t-1"));

        let next = roster
            .select_next_candidate("i-1", &["t-1".to_string(), "t-2".to_string()])
            .await
            .unwrap();
        assert_eq!(next.as_deref(), Some("t-3"));
    }

    #[tokio::test]
    async fn exhausted_roster_returns_none() {
        let roster = StaticRoster::new(vec!["t-1".to_string()]);
        let next = roster
            .select_next_candidate("i-1", &["t-1".to_string()])
            .await
            .unwrap();
        assert!(next.is_none());
    }
}
