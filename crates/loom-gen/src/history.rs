//! Per-node result history with a navigation cursor

use crate::state::ResultEntry;
use std::path::Path;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Insertion-ordered results for one node, deduplicated by artifact path.
///
/// The cursor always points at a valid entry unless the history is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    entries: Vec<ResultEntry>,
    cursor: usize,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            limit: limit.max(1),
        }
    }

    /// Rebuild from persisted parts, clamping the cursor and trimming to `limit`
    pub fn from_parts(entries: Vec<ResultEntry>, cursor: usize, limit: usize) -> Self {
        let mut history = Self::new(limit);
        for entry in entries {
            if history.position(&entry.artifact_path).is_none() {
                history.entries.push(entry);
            }
        }
        let excess = history.entries.len().saturating_sub(history.limit);
        history.entries.drain(..excess);
        history.cursor = cursor.saturating_sub(excess);
        history.clamp();
        history
    }

    /// Append a result and point the cursor at it. Returns false if the path
    /// was already present, in which case the cursor moves to the existing entry.
    pub fn append(&mut self, entry: ResultEntry) -> bool {
        if let Some(index) = self.position(&entry.artifact_path) {
            self.cursor = index;
            return false;
        }
        self.entries.push(entry);
        if self.entries.len() > self.limit {
            let excess = self.entries.len() - self.limit;
            self.entries.drain(..excess);
        }
        self.cursor = self.entries.len() - 1;
        true
    }

    /// Move the cursor by `delta`, clamped to the valid range
    pub fn navigate(&mut self, delta: isize) -> Option<&ResultEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        let target = if delta < 0 {
            self.cursor.saturating_sub(delta.unsigned_abs())
        } else {
            self.cursor.saturating_add(delta as usize).min(last)
        };
        self.cursor = target;
        self.current()
    }

    /// Jump to `index`, clamped
    pub fn select(&mut self, index: usize) -> Option<&ResultEntry> {
        if self.entries.is_empty() {
            return None;
        }
        self.cursor = index.min(self.entries.len() - 1);
        self.current()
    }

    pub fn current(&self) -> Option<&ResultEntry> {
        self.entries.get(self.cursor)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn entries(&self) -> &[ResultEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    fn position(&self, path: &Path) -> Option<usize> {
        self.entries.iter().position(|e| e.artifact_path == path)
    }

    fn clamp(&mut self) {
        self.cursor = self.cursor.min(self.entries.len().saturating_sub(1));
    }
}
