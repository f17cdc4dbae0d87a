//! JSON document a node stores in its host file

use crate::history::History;
use crate::state::ResultEntry;
use loom_core::{LoomError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const NODE_DOCUMENT_VERSION: u32 = 1;

/// Persisted history of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub version: u32,
    #[serde(default)]
    pub history: Vec<ResultEntry>,
    #[serde(default)]
    pub cursor: usize,
    #[serde(default)]
    pub last_model_used: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnyDocument {
    Versioned(NodeDocument),
    Legacy(Vec<ResultEntry>),
}

impl Default for NodeDocument {
    fn default() -> Self {
        Self {
            version: NODE_DOCUMENT_VERSION,
            history: Vec::new(),
            cursor: 0,
            last_model_used: None,
        }
    }
}

impl NodeDocument {
    pub fn from_history(history: &History, last_model_used: Option<&str>) -> Self {
        Self {
            version: NODE_DOCUMENT_VERSION,
            history: history.entries().to_vec(),
            cursor: history.cursor(),
            last_model_used: last_model_used.map(str::to_string),
        }
    }

    /// Rebuild a `History`, clamping the stored cursor
    pub fn to_history(&self, limit: usize) -> History {
        History::from_parts(self.history.clone(), self.cursor, limit)
    }

    /// Parse a document, accepting the unversioned bare-array form
    pub fn from_json(json: &str) -> Result<Self> {
        let doc = match serde_json::from_str::<AnyDocument>(json)? {
            AnyDocument::Versioned(doc) => doc,
            AnyDocument::Legacy(history) => {
                let cursor = history.len().saturating_sub(1);
                Self {
                    version: NODE_DOCUMENT_VERSION,
                    history,
                    cursor,
                    last_model_used: None,
                }
            }
        };

        if doc.version > NODE_DOCUMENT_VERSION {
            return Err(LoomError::Config(format!(
                "node document version {} is newer than supported version {}",
                doc.version, NODE_DOCUMENT_VERSION
            )));
        }

        let mut doc = doc;
        doc.version = NODE_DOCUMENT_VERSION;
        doc.cursor = doc.cursor.min(doc.history.len().saturating_sub(1));
        Ok(doc)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"[
        {"artifact_path": "/r/a.png", "model_id": "m", "created_at": "2025-01-01T00:00:00Z"},
        {"artifact_path": "/r/b.png", "model_id": "m", "created_at": "2025-01-02T00:00:00Z"}
    ]"#;

    #[test]
    fn test_legacy_array_loads() {
        let doc = NodeDocument::from_json(LEGACY).unwrap();
        assert_eq!(doc.version, NODE_DOCUMENT_VERSION);
        assert_eq!(doc.history.len(), 2);
        assert_eq!(doc.cursor, 1);
        assert!(doc.last_model_used.is_none());
    }

    #[test]
    fn test_newer_version_rejected() {
        let err = NodeDocument::from_json(r#"{"version": 2, "history": []}"#).unwrap_err();
        assert!(matches!(err, LoomError::Config(_)));
    }

    #[test]
    fn test_cursor_clamped_on_load() {
        let json = r#"{
            "version": 1,
            "history": [{"artifact_path": "/r/a.png", "model_id": "m", "created_at": "2025-01-01T00:00:00Z"}],
            "cursor": 7,
            "last_model_used": "mock-image"
        }"#;
        let doc = NodeDocument::from_json(json).unwrap();
        assert_eq!(doc.cursor, 0);
        assert_eq!(doc.last_model_used.as_deref(), Some("mock-image"));
    }

    #[test]
    fn test_garbage_is_json_error() {
        assert!(matches!(
            NodeDocument::from_json("{not json"),
            Err(LoomError::Json(_))
        ));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes").join("n.json");

        let mut history = History::default();
        history.append(ResultEntry::new("/r/a.png", "mock-image"));
        history.append(ResultEntry::new("/r/b.png", "mock-image"));
        history.navigate(-1);

        NodeDocument::from_history(&history, Some("mock-image"))
            .save(&path)
            .unwrap();
        let loaded = NodeDocument::load(&path).unwrap().to_history(50);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.cursor(), 0);
    }
}
