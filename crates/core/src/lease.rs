// Per-thread run leases
//
// At most one run may own a thread at a time. A lease is taken when a run
// starts and released when its guard drops, which for streaming runs is when
// the caller drops the stream.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{AgentLoopError, Result};

/// Set of threads that currently have a run in flight
#[derive(Debug, Clone, Default)]
pub struct ThreadLeases {
    busy: Arc<Mutex<HashSet<String>>>,
}

impl ThreadLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for a thread; fails with `ThreadBusy` if it is held
    pub fn acquire(&self, thread_id: &str) -> Result<ThreadLease> {
        if !self.lock().insert(thread_id.to_string()) {
            return Err(AgentLoopError::ThreadBusy(thread_id.to_string()));
        }
        debug!(thread_id = %thread_id, "Acquired thread lease");
        Ok(ThreadLease {
            leases: self.clone(),
            thread_id: thread_id.to_string(),
        })
    }

    /// Whether a run currently owns the thread
    pub fn is_held(&self, thread_id: &str) -> bool {
        self.lock().contains(thread_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked
        self.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive right to run the loop on one thread
#[derive(Debug)]
pub struct ThreadLease {
    leases: ThreadLeases,
    thread_id: String,
}

impl ThreadLease {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

impl Drop for ThreadLease {
    fn drop(&mut self) {
        self.leases.lock().remove(&self.thread_id);
        debug!(thread_id = %self.thread_id, "Released thread lease");
    }
}
