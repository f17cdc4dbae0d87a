//! Process-wide cancellation
//!
//! A single `CancellationToken` is shared by every job. Raising it cancels
//! every call that is in flight at that moment; it is a panic button, not a
//! per-job switch. The token is an epoch counter: each job remembers the epoch
//! it started in and treats any later epoch as cancellation, so jobs started
//! after the button was pressed run normally.
//!
//! A job can additionally be superseded on its own when the same node starts
//! a new job (see `registry`). Both signals are observed through a
//! `CancelProbe`.

use loom_core::ProviderError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep while waiting on a cancellable delay
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Shared cancellation flag for all generation jobs
#[derive(Debug, Default)]
pub struct CancellationToken {
    epoch: AtomicU64,
}

impl CancellationToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Cancel every job currently in flight. Returns the new epoch.
    pub fn cancel_all(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Build a probe for a job starting now.
    pub fn probe(self: &Arc<Self>, superseded: Arc<AtomicBool>) -> CancelProbe {
        CancelProbe {
            token: Arc::clone(self),
            epoch: self.epoch(),
            superseded,
        }
    }
}

/// A job's view of the cancellation state, checked at every network boundary
#[derive(Debug, Clone)]
pub struct CancelProbe {
    token: Arc<CancellationToken>,
    epoch: u64,
    superseded: Arc<AtomicBool>,
}

impl CancelProbe {
    /// A probe that only reacts to the global token (no lease attached)
    pub fn detached(token: &Arc<CancellationToken>) -> Self {
        token.probe(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_cancelled(&self) -> bool {
        self.superseded.load(Ordering::SeqCst) || self.token.epoch() != self.epoch
    }

    /// Fail with `Cancelled` if the job has been cancelled or superseded
    pub fn check(&self) -> Result<(), ProviderError> {
        if self.is_cancelled() {
            Err(ProviderError::cancelled())
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with `Cancelled` if cancellation is raised
    pub fn sleep(&self, duration: Duration) -> Result<(), ProviderError> {
        let deadline = Instant::now().checked_add(duration);
        loop {
            self.check()?;
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(());
                    }
                    (deadline - now).min(SLEEP_SLICE)
                }
                None => SLEEP_SLICE,
            };
            std::thread::sleep(slice);
        }
    }
}
