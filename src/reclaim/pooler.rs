use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::WorkerSignal;
use crate::config::PoolerConfig;
use crate::store::StoreCore;

/// Keeps pre-clone queues stocked for records shared by several tiles.
///
/// A record with `n` users is likely to be duplicated `n - 1` more times
/// (each sharing tile copies it on its first write), so the pooler prepares
/// up to that many copies ahead of time, bounded per record and by the
/// pool memory limit.
pub struct Pooler {
    config: PoolerConfig,
    signal: Arc<WorkerSignal>,
    clones_created: AtomicU64,
}

impl Pooler {
    pub(crate) fn new(config: PoolerConfig) -> Self {
        Self {
            config,
            signal: Arc::new(WorkerSignal::new()),
            clones_created: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PoolerConfig {
        &self.config
    }

    pub(crate) fn signal(&self) -> Arc<WorkerSignal> {
        self.signal.clone()
    }

    /// Wake the pooler thread, if one runs.
    pub fn kick(&self) {
        self.signal.kick();
    }

    /// Pre-clones created since the store was built.
    pub fn clones_created(&self) -> u64 {
        self.clones_created.load(Ordering::Relaxed)
    }

    /// Run one pooling pass. Returns the number of pre-clones created.
    pub(crate) fn run_cycle(&self, core: &StoreCore) -> usize {
        let memory = core.memory();
        let mut created = 0;

        for td in core.begin_iteration() {
            if memory.pooled_bytes() >= self.config.pool_limit_bytes {
                break;
            }

            let wanted = td
                .users()
                .saturating_sub(1)
                .min(self.config.max_clones_per_tile);
            let queued = td.pre_clone_count();
            if queued >= wanted {
                continue;
            }

            // Swapped-out or busy records are left for a later pass.
            let Some(data) = td.try_read_resident() else {
                continue;
            };

            for _ in queued..wanted {
                if memory.pooled_bytes() + td.size() > self.config.pool_limit_bytes {
                    break;
                }
                td.push_pre_clone(Arc::new(core.clone_tile_data(&td, &data)));
                created += 1;
            }
        }

        if created > 0 {
            self.clones_created
                .fetch_add(created as u64, Ordering::Relaxed);
            debug!(
                created,
                pooled_bytes = memory.pooled_bytes(),
                "Pooler prepared pre-clones"
            );
        }
        created
    }
}
