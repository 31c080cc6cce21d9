//! Tile store workload - drives a tile-data store with painter threads.
//!
//! Each painter keeps a set of tiles and randomly allocates, shares,
//! writes (copy-on-write duplicating shared data), reads and frees them,
//! while the pooler and swapper run in the background.

use clap::Parser;
use rand::Rng;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tile_data_store::{
    tile_bytes, Config, FileSwapStore, ReportFormat, StoreError, TileData, TileDataStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let store = match create_store(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to create tile data store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Configuration:");
    info!(
        "  Painters: {} x {} tiles of {} bytes",
        config.threads,
        config.tiles_per_thread,
        tile_bytes(config.pixel_size)
    );
    info!(
        "  Limits: soft {}MB, hard {}MB, pool {}MB",
        config.soft_limit_mib, config.hard_limit_mib, config.pool_limit_mib
    );
    match config.swap_dir {
        Some(ref dir) => info!("  Swap: file in {}", dir.display()),
        None => info!("  Swap: in memory"),
    }
    info!("  Duration: {}s", config.duration_secs);

    // Start painters
    let stop = Arc::new(AtomicBool::new(false));
    let painters: Vec<_> = (0..config.threads)
        .map(|index| {
            let store = store.clone();
            let stop = stop.clone();
            let workload = Workload::from_config(&config);
            tokio::task::spawn_blocking(move || run_painter(index, &store, &workload, &stop))
        })
        .collect();

    // Report until the run ends
    let mut reports = tokio::time::interval(config.report_interval());
    reports.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = tokio::time::sleep(config.duration());
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Run duration elapsed, stopping painters");
                break;
            }
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Interrupted, stopping painters"),
                    Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
                }
                break;
            }
            _ = reports.tick() => report(&store, config.format),
        }
    }

    stop.store(true, Ordering::Release);

    let mut totals = PainterStats::default();
    let mut failed = false;
    for painter in painters {
        match painter.await {
            Ok(Ok(stats)) => totals.merge(&stats),
            Ok(Err(e)) => {
                error!("Painter failed: {}", e);
                failed = true;
            }
            Err(e) => {
                error!("Painter task panicked: {}", e);
                failed = true;
            }
        }
    }

    report(&store, config.format);
    info!(
        "Painters done: {} allocations, {} shares, {} writes, {} reads, {} frees",
        totals.allocations, totals.shares, totals.writes, totals.reads, totals.frees
    );

    if config.verbose {
        store.debug_print_list();
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Initialize the tracing subscriber for logging.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tile_data_store=debug,tile_store_workload=debug"
    } else {
        "tile_data_store=info,tile_store_workload=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn create_store(config: &Config) -> Result<TileDataStore, StoreError> {
    let store_config = config.store_config();
    match config.swap_dir {
        Some(ref dir) => TileDataStore::new(store_config, FileSwapStore::create_in(dir)?),
        None => TileDataStore::in_memory(store_config),
    }
}

fn report(store: &TileDataStore, format: ReportFormat) {
    let stats = store.statistics();
    match format {
        ReportFormat::Text => info!(
            "{} records, {}KB resident, {} pooled ({}KB), pool {}/{} hit/miss, swap {}/{} out/in",
            stats.record_count,
            stats.memory.resident_bytes / 1024,
            stats.memory.pooled_clones,
            stats.memory.pooled_bytes / 1024,
            stats.pool_hits,
            stats.pool_misses,
            stats.swap_outs,
            stats.swap_ins
        ),
        ReportFormat::Json => match serde_json::to_string(&stats) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize statistics: {}", e),
        },
    }
}

// =============================================================================
// Painters
// =============================================================================

#[derive(Debug, Clone)]
struct Workload {
    tile_size: usize,
    default_pixel: Vec<u8>,
    max_tiles: usize,
}

impl Workload {
    fn from_config(config: &Config) -> Self {
        Self {
            tile_size: tile_bytes(config.pixel_size),
            default_pixel: vec![0; config.pixel_size],
            max_tiles: config.tiles_per_thread,
        }
    }
}

#[derive(Debug, Default)]
struct PainterStats {
    allocations: u64,
    shares: u64,
    writes: u64,
    reads: u64,
    frees: u64,
}

impl PainterStats {
    fn merge(&mut self, other: &PainterStats) {
        self.allocations += other.allocations;
        self.shares += other.shares;
        self.writes += other.writes;
        self.reads += other.reads;
        self.frees += other.frees;
    }
}

/// Drop one tile's reference, freeing the data with its last user.
fn release_tile(store: &TileDataStore, td: Arc<TileData>, stats: &mut PainterStats) {
    if td.release_user() == 0 {
        store.free(td);
        stats.frees += 1;
    }
}

fn run_painter(
    index: usize,
    store: &TileDataStore,
    workload: &Workload,
    stop: &AtomicBool,
) -> Result<PainterStats, StoreError> {
    let mut rng = rand::thread_rng();
    let mut stats = PainterStats::default();
    let mut tiles: Vec<Arc<TileData>> = Vec::with_capacity(workload.max_tiles);

    debug!(painter = index, "Painter started");

    while !stop.load(Ordering::Acquire) {
        if tiles.len() < workload.max_tiles / 2 {
            let td = store.allocate(workload.tile_size, &workload.default_pixel);
            td.acquire_user();
            tiles.push(td);
            stats.allocations += 1;
            continue;
        }

        let slot = rng.gen_range(0..tiles.len());
        match rng.gen_range(0..10) {
            // Share the data with a new tile, as a layer copy would.
            0 if tiles.len() < workload.max_tiles => {
                let td = tiles[slot].clone();
                td.acquire_user();
                tiles.push(td);
                stats.shares += 1;
            }
            // Paint: shared data is duplicated first.
            1..=4 => {
                if tiles[slot].users() > 1 {
                    let copy = store.duplicate(&tiles[slot])?;
                    copy.acquire_user();
                    let shared = std::mem::replace(&mut tiles[slot], copy);
                    release_tile(store, shared, &mut stats);
                }

                let value: u8 = rng.gen();
                let mut data = store.ensure_loaded_mut(&tiles[slot])?;
                let offset = rng.gen_range(0..data.len());
                data[offset] = value;
                stats.writes += 1;
            }
            // Render: read the whole tile.
            5..=8 => {
                let data = store.ensure_loaded(&tiles[slot])?;
                let checksum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
                std::hint::black_box(checksum);
                stats.reads += 1;
            }
            _ => {
                let td = tiles.swap_remove(slot);
                release_tile(store, td, &mut stats);
            }
        }
    }

    for td in tiles.drain(..) {
        release_tile(store, td, &mut stats);
    }

    debug!(painter = index, writes = stats.writes, "Painter stopped");
    Ok(stats)
}
