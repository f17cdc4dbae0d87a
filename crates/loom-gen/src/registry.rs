//! Job registry: one active lease per node
//!
//! Starting a job for a node that already has one supersedes the old job:
//! the registry signals the current holder to stop and waits, bounded, for
//! it to release before granting the new lease. Leases release themselves
//! when dropped, which happens on the worker thread as the job finishes.

use loom_core::{JobId, LeaseId, LoomError, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default bound on how long a new job waits for a superseded one to stop
pub const DEFAULT_SUPERSEDE_WAIT: Duration = Duration::from_secs(3);

#[derive(Debug)]
struct Holder {
    lease: LeaseId,
    superseded: Arc<AtomicBool>,
}

#[derive(Debug)]
struct Shared {
    active: Mutex<HashMap<JobId, Holder>>,
    released: Condvar,
    supersede_wait: Duration,
}

impl Shared {
    /// Block until a release is signalled. Returns true if `deadline` passed
    /// first; without a deadline this waits indefinitely.
    fn wait_released(
        &self,
        active: &mut MutexGuard<'_, HashMap<JobId, Holder>>,
        deadline: Option<Instant>,
    ) -> bool {
        match deadline {
            Some(deadline) => self.released.wait_until(active, deadline).timed_out(),
            None => {
                self.released.wait(active);
                false
            }
        }
    }
}

/// Registry of active job leases. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    shared: Arc<Shared>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SUPERSEDE_WAIT)
    }
}

impl JobRegistry {
    pub fn new(supersede_wait: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                active: Mutex::new(HashMap::new()),
                released: Condvar::new(),
                supersede_wait,
            }),
        }
    }

    /// Acquire the exclusive lease for `job_id`.
    ///
    /// If another lease is held, its holder is told to stop and this call
    /// waits up to the supersede bound for it to release. Fails with
    /// `AlreadyRunning` if the holder does not let go in time.
    pub fn acquire(&self, job_id: &JobId) -> Result<Lease> {
        let deadline = Instant::now().checked_add(self.shared.supersede_wait);
        let mut active = self.shared.active.lock();

        while let Some(holder) = active.get(job_id) {
            if !holder.superseded.swap(true, Ordering::SeqCst) {
                info!(job_id = %job_id, lease = %holder.lease, "superseding running job");
            }
            if self.shared.wait_released(&mut active, deadline) && active.contains_key(job_id)
            {
                warn!(job_id = %job_id, "previous job did not stop in time");
                return Err(LoomError::AlreadyRunning(job_id.clone()));
            }
        }

        let lease = LeaseId::next();
        let superseded = Arc::new(AtomicBool::new(false));
        active.insert(
            job_id.clone(),
            Holder {
                lease,
                superseded: Arc::clone(&superseded),
            },
        );
        debug!(job_id = %job_id, lease = %lease, "lease granted");

        Ok(Lease {
            job_id: job_id.clone(),
            id: lease,
            superseded,
            registry: self.clone(),
        })
    }

    /// Release the lease for `job_id` if `lease` is still the holder.
    ///
    /// A stale lease never releases a newer holder.
    pub fn release(&self, job_id: &JobId, lease: LeaseId) -> bool {
        let mut active = self.shared.active.lock();
        let is_holder = active.get(job_id).map(|h| h.lease == lease).unwrap_or(false);
        if is_holder {
            active.remove(job_id);
            debug!(job_id = %job_id, lease = %lease, "lease released");
            self.shared.released.notify_all();
        }
        is_holder
    }

    /// Ask the current holder of `job_id` to stop, without waiting
    pub fn supersede(&self, job_id: &JobId) -> bool {
        let active = self.shared.active.lock();
        match active.get(job_id) {
            Some(holder) => {
                holder.superseded.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, job_id: &JobId) -> bool {
        self.shared.active.lock().contains_key(job_id)
    }

    pub fn active_count(&self) -> usize {
        self.shared.active.lock().len()
    }

    /// Wait until no leases are held, or the timeout passes
    pub fn wait_all_released(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut active = self.shared.active.lock();
        while !active.is_empty() {
            if self.shared.wait_released(&mut active, deadline) {
                return active.is_empty();
            }
        }
        true
    }
}

/// Exclusive right to run a job for one node. Released on drop.
#[derive(Debug)]
pub struct Lease {
    job_id: JobId,
    id: LeaseId,
    superseded: Arc<AtomicBool>,
    registry: JobRegistry,
}

impl Lease {
    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Flag raised when a newer job for the same node wants this lease
    pub fn superseded_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.superseded)
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::SeqCst)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.registry.release(&self.job_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn job(node: &str) -> JobId {
        JobId::new("graph", node)
    }

    #[test]
    fn test_acquire_and_release_on_drop() {
        let registry = JobRegistry::default();
        let lease = registry.acquire(&job("a")).unwrap();
        assert!(registry.is_active(&job("a")));
        drop(lease);
        assert!(!registry.is_active(&job("a")));
    }

    #[test]
    fn test_different_nodes_do_not_conflict() {
        let registry = JobRegistry::default();
        let a = registry.acquire(&job("a")).unwrap();
        let b = registry.acquire(&job("b")).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn test_supersede_waits_for_release() {
        let registry = JobRegistry::new(Duration::from_secs(5));
        let first = registry.acquire(&job("a")).unwrap();
        let first_id = first.id();
        let flag = first.superseded_flag();

        // Stand-in worker: stops once it notices it was superseded
        let worker = std::thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            drop(first);
        });

        let second = registry.acquire(&job("a")).unwrap();
        assert_ne!(second.id(), first_id);
        worker.join().unwrap();
        assert!(registry.is_active(&job("a")));
    }

    #[test]
    fn test_holder_that_never_stops_yields_already_running() {
        let registry = JobRegistry::new(Duration::from_millis(50));
        let first = registry.acquire(&job("a")).unwrap();
        let err = registry.acquire(&job("a")).unwrap_err();
        assert!(matches!(err, LoomError::AlreadyRunning(_)));
        assert!(first.is_superseded());
    }

    #[test]
    fn test_stale_release_does_not_free_new_holder() {
        let registry = JobRegistry::new(Duration::from_millis(200));
        let first = registry.acquire(&job("a")).unwrap();
        let stale_id = first.id();
        drop(first);
        let _second = registry.acquire(&job("a")).unwrap();

        assert!(!registry.release(&job("a"), stale_id));
        assert!(registry.is_active(&job("a")));
    }

    #[test]
    fn test_concurrent_acquire_never_overlaps() {
        let registry = JobRegistry::new(Duration::from_secs(5));
        let holders = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let holders = Arc::clone(&holders);
                let max_seen = Arc::clone(&max_seen);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        if let Ok(lease) = registry.acquire(&job("shared")) {
                            let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(1));
                            holders.fetch_sub(1, Ordering::SeqCst);
                            drop(lease);
                        }
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(!registry.is_active(&job("shared")));
    }

    #[test]
    fn test_wait_all_released() {
        let registry = JobRegistry::default();
        let lease = registry.acquire(&job("a")).unwrap();
        assert!(!registry.wait_all_released(Duration::from_millis(20)));
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drop(lease);
        });
        assert!(registry.wait_all_released(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn test_unbounded_waits_do_not_overflow() {
        let registry = JobRegistry::new(Duration::MAX);
        let first = registry.acquire(&job("a")).unwrap();
        let flag = first.superseded_flag();
        let worker = std::thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            drop(first);
        });

        let second = registry.acquire(&job("a")).unwrap();
        worker.join().unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drop(second);
        });
        assert!(registry.wait_all_released(Duration::MAX));
        releaser.join().unwrap();
    }
}
