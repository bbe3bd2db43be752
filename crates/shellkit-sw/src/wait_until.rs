//! Work an event handler spawned and the host must keep alive.
//!
//! A handler that returns before its background work is done (the cache
//! refresh behind a stale response, runtime shell population) hands the
//! spawned tasks back in a [`WaitUntil`]. The host must not tear the worker
//! down until [`WaitUntil::settle`] resolves. Dropping a `WaitUntil` detaches
//! the tasks; they keep running but nothing waits for them.

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::warn;

/// Set of spawned tasks tied to one event.
#[derive(Debug, Default)]
pub struct WaitUntil {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl WaitUntil {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` on the runtime and track it.
    pub fn spawn<F>(&mut self, label: &'static str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push((label, tokio::spawn(work)));
    }

    /// Track an already spawned task.
    pub fn push(&mut self, label: &'static str, handle: JoinHandle<()>) {
        self.tasks.push((label, handle));
    }

    /// Absorb another scope's tasks.
    pub fn extend(&mut self, other: WaitUntil) {
        self.tasks.extend(other.tasks);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task. Returns how many panicked or were cancelled.
    pub async fn settle(self) -> usize {
        let mut failed = 0;
        for (label, handle) in self.tasks {
            if let Err(e) = handle.await {
                warn!(task = label, error = %e, "Extended work did not complete");
                failed += 1;
            }
        }
        failed
    }
}
