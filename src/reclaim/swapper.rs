use std::sync::Arc;

use tracing::debug;

use super::WorkerSignal;
use crate::config::SwapperConfig;
use crate::store::StoreCore;

/// Evicts cold records when resident memory runs over the soft limit.
///
/// Eviction is a second-chance clock sweep: records touched since the last
/// visit get their accessed bit cleared and are passed over, the rest are
/// swapped out if their data lock is free.
pub struct Swapper {
    config: SwapperConfig,
    signal: Arc<WorkerSignal>,
}

impl Swapper {
    pub(crate) fn new(config: SwapperConfig) -> Self {
        Self {
            config,
            signal: Arc::new(WorkerSignal::new()),
        }
    }

    pub fn config(&self) -> &SwapperConfig {
        &self.config
    }

    pub(crate) fn signal(&self) -> Arc<WorkerSignal> {
        self.signal.clone()
    }

    /// Wake the swapper thread, if one runs.
    pub fn kick(&self) {
        self.signal.kick();
    }

    /// Memory pressure check run before every allocation.
    ///
    /// Above the hard limit the caller sweeps synchronously; above the soft
    /// limit the swapper thread is woken up.
    pub(crate) fn check_free_memory(&self, core: &StoreCore) {
        let resident = core.memory().resident_bytes();

        if resident > self.config.hard_limit_bytes {
            debug!(
                resident,
                hard_limit = self.config.hard_limit_bytes,
                "Over hard memory limit, swapping on the allocating thread"
            );
            self.run_cycle(core);
        } else if resident > self.config.soft_limit_bytes {
            self.kick();
        }
    }

    /// Run one sweep. Returns the number of records swapped out.
    pub(crate) fn run_cycle(&self, core: &StoreCore) -> usize {
        let memory = core.memory();
        if memory.resident_bytes() <= self.config.soft_limit_bytes {
            return 0;
        }

        let target = self.config.target_bytes();
        let mut visited = 0;
        let mut swapped = 0;

        let mut clock = core.begin_clock_iteration();
        while memory.resident_bytes() > target && visited < self.config.max_sweep {
            let Some(td) = clock.next() else {
                break;
            };
            visited += 1;

            if td.take_accessed() {
                continue;
            }
            if core.try_swap(&td) {
                swapped += 1;
            }
        }
        clock.end();

        debug!(
            visited,
            swapped,
            resident = memory.resident_bytes(),
            target,
            "Swapper cycle finished"
        );
        swapped
    }
}
