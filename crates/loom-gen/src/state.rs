//! Per-node job state as seen by the UI

use crate::provider::Capability;
use chrono::{DateTime, Utc};
use loom_core::{truncate_detail, LoomError, ProviderError, ProviderErrorKind, STATUS_DETAIL_LIMIT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of a node's generation slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    Generating,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Idle => "idle",
            JobStatus::Generating => "generating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One promoted generation result. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub artifact_path: PathBuf,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

impl ResultEntry {
    pub fn new(artifact_path: impl Into<PathBuf>, model_id: impl Into<String>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            model_id: model_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Where a job failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source", content = "kind")]
pub enum ErrorKind {
    Provider(ProviderErrorKind),
    ArtifactWrite,
    /// The worker thread died before reporting
    Worker,
}

/// Failure recorded on a job; `detail` is the untruncated text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub detail: String,
}

impl From<&ProviderError> for ErrorInfo {
    fn from(e: &ProviderError) -> Self {
        Self {
            kind: ErrorKind::Provider(e.kind),
            detail: e.detail.clone(),
        }
    }
}

impl From<&LoomError> for ErrorInfo {
    fn from(e: &LoomError) -> Self {
        match e {
            LoomError::Provider(p) => p.into(),
            LoomError::ArtifactWriteFailure { .. } => Self {
                kind: ErrorKind::ArtifactWrite,
                detail: e.to_string(),
            },
            other => Self {
                kind: ErrorKind::Worker,
                detail: other.to_string(),
            },
        }
    }
}

/// Read-only snapshot of a node's job
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub provider: Option<String>,
    pub capability: Option<Capability>,
    pub model_id: Option<String>,
    pub status_message: String,
    /// Artifact of the most recent completed job; cleared when a new job starts
    pub result: Option<ResultEntry>,
    pub error: Option<ErrorInfo>,
}

impl JobState {
    pub(crate) fn begin(&mut self, provider: &str, capability: Capability, model: &str) {
        self.status = JobStatus::Generating;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.provider = Some(provider.to_string());
        self.capability = Some(capability);
        self.model_id = Some(model.to_string());
        self.status_message = "Generating...".to_string();
        self.result = None;
        self.error = None;
    }

    pub(crate) fn complete(&mut self, entry: ResultEntry) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.model_id = Some(entry.model_id.clone());
        self.status_message = "Completed".to_string();
        self.result = Some(entry);
        self.error = None;
    }

    pub(crate) fn fail(&mut self, error: ErrorInfo) {
        self.status = JobStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.status_message = format!(
            "Error: {}",
            truncate_detail(&error.detail, STATUS_DETAIL_LIMIT)
        );
        self.error = Some(error);
    }

    pub(crate) fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        self.status_message = "Cancelled".to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        let state = JobState::default();
        assert_eq!(state.status, JobStatus::Idle);
        assert!(state.status_message.is_empty());
        assert!(!state.status.is_terminal());
    }

    #[test]
    fn test_transitions_set_messages() {
        let mut state = JobState::default();
        state.begin("mock", Capability::ImageGenerate, "mock-image");
        assert_eq!(state.status, JobStatus::Generating);
        assert_eq!(state.status_message, "Generating...");
        assert!(state.started_at.is_some());

        state.cancel();
        assert_eq!(state.status, JobStatus::Cancelled);
        assert_eq!(state.status_message, "Cancelled");

        state.begin("mock", Capability::ImageGenerate, "mock-image");
        state.complete(ResultEntry::new("/tmp/a.png", "mock-image"));
        assert_eq!(state.status, JobStatus::Completed);
        assert!(state.result.is_some());
    }

    #[test]
    fn test_failure_message_truncated_detail_kept() {
        let long = "x".repeat(300);
        let mut state = JobState::default();
        state.begin("google", Capability::TextGenerate, "gemini-2.5-flash");
        state.fail(ErrorInfo::from(&ProviderError::bad_response(long.clone())));

        assert_eq!(state.status, JobStatus::Failed);
        assert!(state.status_message.starts_with("Error: "));
        assert!(state.status_message.chars().count() <= "Error: ".len() + STATUS_DETAIL_LIMIT + 3);
        assert_eq!(state.error.as_ref().unwrap().detail, long);
        assert_eq!(
            state.error.unwrap().kind,
            ErrorKind::Provider(ProviderErrorKind::BadResponse)
        );
    }

    #[test]
    fn test_artifact_error_kind() {
        let err = LoomError::ArtifactWriteFailure {
            path: "/x".to_string(),
            reason: "disk full".to_string(),
        };
        assert_eq!(ErrorInfo::from(&err).kind, ErrorKind::ArtifactWrite);
    }

    #[test]
    fn test_failed_restart_carries_no_stale_result() {
        let mut state = JobState::default();
        state.begin("mock", Capability::ImageGenerate, "mock-image");
        state.complete(ResultEntry::new("/r/a.png", "mock-image"));
        assert!(state.result.is_some());

        state.begin("mock", Capability::ImageGenerate, "mock-image");
        assert!(state.result.is_none());
        state.fail(ErrorInfo {
            kind: ErrorKind::Worker,
            detail: "boom".to_string(),
        });
        assert!(state.result.is_none());
        assert!(state.error.is_some());

        state.begin("mock", Capability::ImageGenerate, "mock-image");
        state.cancel();
        assert!(state.result.is_none());
    }
}
