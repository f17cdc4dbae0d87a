//! Run-on-main-thread queue
//!
//! Worker threads never touch node state. They post closures here, and the
//! thread that owns the state drains the queue from its UI tick.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::trace;

type Task<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

/// Receiving end, owned by the main thread
pub struct MainThreadQueue<C> {
    tx: Sender<Task<C>>,
    rx: Receiver<Task<C>>,
}

/// Posting end, cloneable onto any thread
pub struct MainThreadHandle<C> {
    tx: Sender<Task<C>>,
}

impl<C> Clone for MainThreadHandle<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<C> MainThreadHandle<C> {
    /// Schedule `task` for the main thread. Returns false if the queue is gone.
    pub fn run_on_main(&self, task: impl FnOnce(&mut C) + Send + 'static) -> bool {
        self.tx.send(Box::new(task)).is_ok()
    }
}

impl<C> Default for MainThreadQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> MainThreadQueue<C> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn handle(&self) -> MainThreadHandle<C> {
        MainThreadHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run every task queued so far without blocking. Returns how many ran.
    pub fn run_pending(&self, context: &mut C) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task(context);
            ran += 1;
        }
        if ran > 0 {
            trace!(ran, "ran main-thread tasks");
        }
        ran
    }

    /// Block up to `timeout` for one task and run it
    pub fn run_next_timeout(&self, context: &mut C, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task(context);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}
