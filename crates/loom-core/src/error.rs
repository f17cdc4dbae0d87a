//! Error types for Loom

use crate::id::JobId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum number of characters of error detail shown in a node's status line
pub const STATUS_DETAIL_LIMIT: usize = 100;

/// Category of a failed provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// No credential configured, or the remote service rejected it
    AuthMissing,
    RateLimited,
    Timeout,
    /// The service answered, but not with anything we can use
    BadResponse,
    /// Connection, DNS, IO or transient 5xx failure
    Network,
    /// The shared cancellation flag was raised while the call was in flight
    Cancelled,
}

impl ProviderErrorKind {
    /// Whether an idempotent call may be retried after this failure
    pub fn is_transient(self) -> bool {
        matches!(self, ProviderErrorKind::Network)
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderErrorKind::AuthMissing => "auth missing",
            ProviderErrorKind::RateLimited => "rate limited",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::BadResponse => "bad response",
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A normalized failure from any provider call
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub detail: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ProviderErrorKind::Cancelled, "generation cancelled")
    }

    pub fn bad_response(detail: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::BadResponse, detail)
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, detail)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ProviderErrorKind::Cancelled
    }

    /// The detail, cut down to fit a status line
    pub fn short_message(&self) -> String {
        truncate_detail(&self.detail, STATUS_DETAIL_LIMIT)
    }
}

/// Cut `text` to at most `limit` characters, appending an ellipsis when cut.
pub fn truncate_detail(text: &str, limit: usize) -> String {
    let single_line = text.trim().replace(['\n', '\r'], " ");
    if single_line.chars().count() <= limit {
        return single_line;
    }
    let mut out: String = single_line.chars().take(limit.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// The main error type for Loom operations
#[derive(Debug, Error)]
pub enum LoomError {
    #[error("Missing credential for provider '{provider}'")]
    MissingCredential { provider: String },

    #[error("Job already running: {0}")]
    AlreadyRunning(JobId),

    #[error("Failed to write artifact {path}: {reason}")]
    ArtifactWriteFailure { path: String, reason: String },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Provider '{provider}' does not support {capability}")]
    UnsupportedCapability { provider: String, capability: String },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Loom operations
pub type Result<T> = std::result::Result<T, LoomError>;

impl From<toml::de::Error> for LoomError {
    fn from(err: toml::de::Error) -> Self {
        LoomError::TomlParse(err.to_string())
    }
}

impl From<toml::ser::Error> for LoomError {
    fn from(err: toml::ser::Error) -> Self {
        LoomError::TomlSer(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_truncates() {
        let err = ProviderError::network("x".repeat(250));
        let msg = err.short_message();
        assert_eq!(msg.chars().count(), STATUS_DETAIL_LIMIT);
        assert!(msg.ends_with("..."));
    }

    #[test]
    fn test_short_message_keeps_short_detail() {
        let err = ProviderError::bad_response("no image in response");
        assert_eq!(err.short_message(), "no image in response");
    }

    #[test]
    fn test_truncate_multibyte_safe() {
        let text = "ü".repeat(120);
        let cut = truncate_detail(&text, 10);
        assert_eq!(cut.chars().count(), 10);
    }

    #[test]
    fn test_truncate_flattens_newlines() {
        assert_eq!(truncate_detail("line one\nline two", 100), "line one line two");
    }

    #[test]
    fn test_only_network_is_transient() {
        assert!(ProviderErrorKind::Network.is_transient());
        assert!(!ProviderErrorKind::RateLimited.is_transient());
        assert!(!ProviderErrorKind::Cancelled.is_transient());
    }

    #[test]
    fn test_display() {
        let err = LoomError::MissingCredential {
            provider: "google".to_string(),
        };
        assert_eq!(err.to_string(), "Missing credential for provider 'google'");
    }
}
