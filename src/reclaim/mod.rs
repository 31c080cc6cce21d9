//! Background memory reclaimers.
//!
//! A store runs two of them, each on its own thread:
//!
//! - [`Pooler`]: prepares pre-clones for records shared by several tiles, so
//!   `duplicate` can hand out a ready copy
//! - [`Swapper`]: evicts cold records to the swap backing store when resident
//!   memory exceeds the soft limit
//!
//! Both are driven by a [`ReclaimerThread`] that runs one cycle per interval
//! or whenever its [`WorkerSignal`] is kicked.

mod pooler;
mod swapper;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::StoreError;

pub use pooler::Pooler;
pub use swapper::Swapper;

// =============================================================================
// Worker Signal
// =============================================================================

#[derive(Debug, Default)]
struct SignalState {
    kicked: bool,
    terminated: bool,
}

/// Wake-up and shutdown flag shared between a reclaimer and its owner.
#[derive(Debug, Default)]
pub struct WorkerSignal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

impl WorkerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a cycle as soon as possible.
    pub fn kick(&self) {
        let mut state = self.state.lock();
        state.kicked = true;
        self.condvar.notify_one();
    }

    pub fn terminate(&self) {
        let mut state = self.state.lock();
        state.terminated = true;
        self.condvar.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    /// Sleep until kicked, terminated or `timeout` elapses.
    ///
    /// Returns `false` once the signal is terminated.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.kicked && !state.terminated {
            self.condvar.wait_for(&mut state, timeout);
        }
        state.kicked = false;
        !state.terminated
    }
}

// =============================================================================
// Reclaimer Thread
// =============================================================================

/// A named thread running a reclaimer cycle periodically.
///
/// Dropping the handle terminates the thread and waits for the cycle in
/// progress to finish.
pub struct ReclaimerThread {
    name: &'static str,
    signal: Arc<WorkerSignal>,
    handle: Option<JoinHandle<()>>,
}

impl ReclaimerThread {
    pub fn spawn<F>(
        name: &'static str,
        signal: Arc<WorkerSignal>,
        interval: Duration,
        mut cycle: F,
    ) -> Result<Self, StoreError>
    where
        F: FnMut() + Send + 'static,
    {
        let thread_signal = signal.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(worker = name, "Reclaimer started");
                while thread_signal.wait(interval) {
                    cycle();
                }
                debug!(worker = name, "Reclaimer stopped");
            })
            .map_err(|source| StoreError::WorkerSpawn { name, source })?;

        Ok(Self {
            name,
            signal,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the thread and join it. Idempotent.
    pub fn terminate(&mut self) {
        self.signal.terminate();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker = self.name, "Reclaimer thread panicked");
            }
        }
    }
}

impl Drop for ReclaimerThread {
    fn drop(&mut self) {
        self.terminate();
    }
}
