//! Job and lease identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for lease identities
static NEXT_LEASE: AtomicU64 = AtomicU64::new(1);

/// Identifies one generation slot: a node inside a node graph.
///
/// Two jobs for the same `JobId` never run concurrently; a new job for the
/// slot supersedes the previous one.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct JobId {
    pub graph_id: String,
    pub node_id: String,
}

impl JobId {
    pub fn new(graph_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            graph_id: graph_id.into(),
            node_id: node_id.into(),
        }
    }

    /// Parse a `graph/node` string
    pub fn parse(s: &str) -> Option<Self> {
        let (graph, node) = s.split_once('/')?;
        if graph.is_empty() || node.is_empty() {
            return None;
        }
        Some(Self::new(graph, node))
    }

    /// A filesystem-safe rendering, used for scratch file and result directory names
    pub fn slug(&self) -> String {
        format!("{}_{}", sanitize(&self.graph_id), sanitize(&self.node_id))
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({}/{})", self.graph_id, self.node_id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.graph_id, self.node_id)
    }
}

/// Identity of a single lease granted on a `JobId`.
///
/// Lease ids are never reused within a process, so a callback carrying an old
/// lease id can always be told apart from the current holder.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(pub u64);

impl LeaseId {
    /// Allocate the next unique lease id
    pub fn next() -> Self {
        Self(NEXT_LEASE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeaseId({})", self.0)
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
