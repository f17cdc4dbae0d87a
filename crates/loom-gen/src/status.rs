//! Process-wide "is anything generating" summary for passive UI refresh

use crate::state::JobStatus;
use loom_core::JobId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cheap, cloneable view of every tracked job's status.
///
/// Only the orchestrator publishes; any thread may read.
#[derive(Debug, Clone, Default)]
pub struct StatusAggregator {
    statuses: Arc<RwLock<BTreeMap<JobId, JobStatus>>>,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff some tracked job is `Generating`
    pub fn any_active(&self) -> bool {
        self.statuses
            .read()
            .values()
            .any(|s| *s == JobStatus::Generating)
    }

    pub fn active_count(&self) -> usize {
        self.statuses
            .read()
            .values()
            .filter(|s| **s == JobStatus::Generating)
            .count()
    }

    pub fn active_jobs(&self) -> Vec<JobId> {
        self.statuses
            .read()
            .iter()
            .filter(|(_, s)| **s == JobStatus::Generating)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn status_of(&self, job_id: &JobId) -> JobStatus {
        self.statuses
            .read()
            .get(job_id)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn publish(&self, job_id: &JobId, status: JobStatus) {
        self.statuses.write().insert(job_id.clone(), status);
    }

    pub(crate) fn forget(&self, job_id: &JobId) {
        self.statuses.write().remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_active() {
        let status = StatusAggregator::new();
        assert!(!status.any_active());

        let a = JobId::new("g", "a");
        let b = JobId::new("g", "b");
        status.publish(&a, JobStatus::Generating);
        status.publish(&b, JobStatus::Completed);
        assert!(status.any_active());
        assert_eq!(status.active_count(), 1);
        assert_eq!(status.active_jobs(), vec![a.clone()]);

        status.publish(&a, JobStatus::Cancelled);
        assert!(!status.any_active());
    }

    #[test]
    fn test_clone_shares_state() {
        let status = StatusAggregator::new();
        let reader = status.clone();
        let id = JobId::new("g", "n");
        status.publish(&id, JobStatus::Generating);
        assert_eq!(reader.status_of(&id), JobStatus::Generating);

        status.forget(&id);
        assert_eq!(reader.status_of(&id), JobStatus::Idle);
    }
}
