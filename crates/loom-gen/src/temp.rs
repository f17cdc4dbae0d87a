//! Scratch files produced while a job is running
//!
//! Providers allocate their output path here before they touch the network,
//! so a file left behind by a failed or abandoned call is always known. Every
//! registered path is deleted exactly once: it leaves the set either by being
//! promoted to a permanent result, by being discarded, or by a sweep at
//! teardown. Whoever removes a path from the set owns its deletion.

use loom_core::{JobId, LoomError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Bounded registry of scratch artifacts pending promotion or cleanup
#[derive(Debug)]
pub struct TempArtifacts {
    dir: PathBuf,
    capacity: usize,
    pending: Mutex<VecDeque<PathBuf>>,
}

impl TempArtifacts {
    /// Create a registry rooted at `dir`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(dir: P, capacity: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            capacity: capacity.max(1),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a fresh scratch path for `job_id` with the given extension.
    ///
    /// The file itself is not created. When the registry is full the oldest
    /// pending path is evicted and deleted.
    pub fn allocate(&self, job_id: &JobId, extension: &str) -> PathBuf {
        let path = self.dir.join(format!(
            "{}_{}.{}",
            job_id.slug(),
            uuid::Uuid::new_v4().simple(),
            extension.trim_start_matches('.')
        ));

        let evicted = {
            let mut pending = self.pending.lock();
            pending.push_back(path.clone());
            let mut evicted = Vec::new();
            while pending.len() > self.capacity {
                if let Some(old) = pending.pop_front() {
                    evicted.push(old);
                }
            }
            evicted
        };

        for old in evicted {
            warn!(path = %old.display(), "temp registry full, evicting oldest artifact");
            delete_file(&old);
        }

        debug!(job_id = %job_id, path = %path.display(), "allocated temp artifact");
        path
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.pending.lock().iter().any(|p| p == path)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Move a registered scratch file to its permanent location.
    ///
    /// If `dest` already exists it is kept as-is and the scratch file is
    /// deleted. On failure the path stays registered so a later discard or
    /// sweep still cleans it up.
    pub fn promote(&self, path: &Path, dest: &Path) -> Result<PathBuf> {
        if !self.contains(path) {
            return Err(LoomError::ArtifactWriteFailure {
                path: path.display().to_string(),
                reason: "not a registered temp artifact".to_string(),
            });
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_failure(dest, e))?;
        }

        if dest.exists() {
            self.discard(path);
            return Ok(dest.to_path_buf());
        }

        if std::fs::rename(path, dest).is_err() {
            // Cross-device moves fall back to copy + delete
            std::fs::copy(path, dest).map_err(|e| write_failure(dest, e))?;
            if self.unregister(path) {
                delete_file(path);
            }
        } else {
            self.unregister(path);
        }

        debug!(from = %path.display(), to = %dest.display(), "promoted temp artifact");
        Ok(dest.to_path_buf())
    }

    /// Forget and delete a scratch file. Returns false if it was not registered.
    pub fn discard(&self, path: &Path) -> bool {
        if self.unregister(path) {
            delete_file(path);
            true
        } else {
            false
        }
    }

    /// Delete every pending scratch file. Returns how many paths were swept.
    pub fn sweep(&self) -> usize {
        let drained: Vec<PathBuf> = self.pending.lock().drain(..).collect();
        for path in &drained {
            delete_file(path);
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "swept temp artifacts");
        }
        drained.len()
    }

    fn unregister(&self, path: &Path) -> bool {
        let mut pending = self.pending.lock();
        match pending.iter().position(|p| p == path) {
            Some(index) => {
                pending.remove(index);
                true
            }
            None => false,
        }
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        self.sweep();
    }
}

fn delete_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to delete temp artifact"),
    }
}

fn write_failure(path: &Path, err: std::io::Error) -> LoomError {
    LoomError::ArtifactWriteFailure {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}
