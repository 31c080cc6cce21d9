//! Configuration for the tile-data store and the workload driver.
//!
//! Two layers live here:
//! - [`StoreConfig`] and its sections, consumed by
//!   [`TileDataStore::new`](crate::store::TileDataStore::new)
//! - [`Config`], the command line of the `tile-store-workload` binary, which
//!   builds a [`StoreConfig`] through [`Config::store_config`]
//!
//! # Example
//!
//! ```ignore
//! use tile_data_store::config::Config;
//!
//! // Parse from command line and environment
//! let config = Config::parse();
//! let store_config = config.store_config();
//!
//! println!("Soft limit: {} bytes", store_config.swapper.soft_limit_bytes);
//! ```
//!
//! # Environment Variables
//!
//! All workload options can be set via environment variables with the `TILES_` prefix:
//!
//! - `TILES_THREADS` - Painter threads (default: 4)
//! - `TILES_DURATION_SECS` - Run duration (default: 10)
//! - `TILES_PER_THREAD` - Live tiles per painter (default: 256)
//! - `TILES_PIXEL_SIZE` - Bytes per pixel (default: 4)
//! - `TILES_SOFT_LIMIT_MIB` - Swapper soft limit (default: 512)
//! - `TILES_HARD_LIMIT_MIB` - Swapper hard limit (default: 768)
//! - `TILES_POOL_LIMIT_MIB` - Pre-clone pool limit (default: 64)
//! - `TILES_POOLER_INTERVAL_MS` - Pooler period (default: 200)
//! - `TILES_SWAPPER_INTERVAL_MS` - Swapper period (default: 500)
//! - `TILES_SWAP_DIR` - Directory for a file-backed swap store
//! - `TILES_REPORT_INTERVAL_SECS` - Statistics report period (default: 1)
//! - `TILES_FORMAT` - Report format, `text` or `json` (default: text)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

// =============================================================================
// Default Values
// =============================================================================

const MIB: usize = 1024 * 1024;

/// Default pooler period.
pub const DEFAULT_POOLER_INTERVAL: Duration = Duration::from_millis(200);

/// Default cap on queued pre-clones per record.
pub const DEFAULT_MAX_CLONES_PER_TILE: usize = 4;

/// Default cap on bytes held in pre-clone queues (64 MiB).
pub const DEFAULT_POOL_LIMIT_BYTES: usize = 64 * MIB;

/// Default swapper period.
pub const DEFAULT_SWAPPER_INTERVAL: Duration = Duration::from_millis(500);

/// Default resident size above which the swapper starts evicting (512 MiB).
pub const DEFAULT_SOFT_LIMIT_BYTES: usize = 512 * MIB;

/// Default resident size above which allocation evicts synchronously (768 MiB).
pub const DEFAULT_HARD_LIMIT_BYTES: usize = 768 * MIB;

/// Default number of records one swapper cycle may visit.
pub const DEFAULT_MAX_SWEEP: usize = 16 * 1024;

// =============================================================================
// Store Configuration
// =============================================================================

/// Pooler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolerConfig {
    /// Time between two cycles when not kicked
    pub interval: Duration,

    /// Upper bound on queued pre-clones per record
    pub max_clones_per_tile: usize,

    /// Upper bound on bytes held across all pre-clone queues
    pub pool_limit_bytes: usize,
}

impl Default for PoolerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POOLER_INTERVAL,
            max_clones_per_tile: DEFAULT_MAX_CLONES_PER_TILE,
            pool_limit_bytes: DEFAULT_POOL_LIMIT_BYTES,
        }
    }
}

/// Swapper tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapperConfig {
    /// Time between two cycles when not kicked
    pub interval: Duration,

    /// Resident bytes above which a cycle evicts records
    pub soft_limit_bytes: usize,

    /// Resident bytes above which `allocate` evicts on the calling thread
    pub hard_limit_bytes: usize,

    /// Records visited per cycle at most
    pub max_sweep: usize,
}

impl SwapperConfig {
    /// Resident size a cycle tries to get down to: the soft limit minus one eighth.
    pub fn target_bytes(&self) -> usize {
        self.soft_limit_bytes - self.soft_limit_bytes / 8
    }
}

impl Default for SwapperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWAPPER_INTERVAL,
            soft_limit_bytes: DEFAULT_SOFT_LIMIT_BYTES,
            hard_limit_bytes: DEFAULT_HARD_LIMIT_BYTES,
            max_sweep: DEFAULT_MAX_SWEEP,
        }
    }
}

/// Configuration of a [`TileDataStore`](crate::store::TileDataStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub pooler: PoolerConfig,
    pub swapper: SwapperConfig,

    /// Start the pooler and swapper threads. When disabled, reclaimer cycles
    /// only run through `run_pooler_cycle` / `run_swapper_cycle` and the
    /// hard-limit check in `allocate`.
    pub background_workers: bool,
}

impl StoreConfig {
    /// Default limits, no background threads.
    pub fn without_background() -> Self {
        Self {
            background_workers: false,
            ..Self::default()
        }
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.pooler.interval.is_zero() {
            return Err("pooler interval must be greater than 0".to_string());
        }
        if self.swapper.interval.is_zero() {
            return Err("swapper interval must be greater than 0".to_string());
        }

        if self.swapper.soft_limit_bytes == 0 {
            return Err("soft_limit_bytes must be greater than 0".to_string());
        }
        if self.swapper.soft_limit_bytes > self.swapper.hard_limit_bytes {
            return Err(format!(
                "soft_limit_bytes ({}) must not exceed hard_limit_bytes ({})",
                self.swapper.soft_limit_bytes, self.swapper.hard_limit_bytes
            ));
        }
        if self.swapper.max_sweep == 0 {
            return Err("max_sweep must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pooler: PoolerConfig::default(),
            swapper: SwapperConfig::default(),
            background_workers: true,
        }
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Output format for periodic statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum ReportFormat {
    /// Human-readable log lines
    #[default]
    Text,
    /// One JSON object per report on stdout
    Json,
}

/// Tile store workload - exercises a tile-data store with painter threads.
///
/// Painters allocate, duplicate, write, read and free tiles while the pooler
/// and swapper run in the background.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-store-workload")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Workload Configuration
    // =========================================================================
    /// Number of painter threads.
    #[arg(short, long, default_value_t = 4, env = "TILES_THREADS")]
    pub threads: usize,

    /// How long to run, in seconds.
    #[arg(short, long, default_value_t = 10, env = "TILES_DURATION_SECS")]
    pub duration_secs: u64,

    /// Live tiles each painter keeps around.
    #[arg(long, default_value_t = 256, env = "TILES_PER_THREAD")]
    pub tiles_per_thread: usize,

    /// Bytes per pixel of the simulated color space.
    #[arg(long, default_value_t = 4, env = "TILES_PIXEL_SIZE")]
    pub pixel_size: usize,

    // =========================================================================
    // Memory Configuration
    // =========================================================================
    /// Resident size (MiB) above which the swapper evicts tiles.
    #[arg(long, default_value_t = 512, env = "TILES_SOFT_LIMIT_MIB")]
    pub soft_limit_mib: usize,

    /// Resident size (MiB) above which allocation evicts synchronously.
    #[arg(long, default_value_t = 768, env = "TILES_HARD_LIMIT_MIB")]
    pub hard_limit_mib: usize,

    /// Memory (MiB) the pooler may spend on pre-clones.
    #[arg(long, default_value_t = 64, env = "TILES_POOL_LIMIT_MIB")]
    pub pool_limit_mib: usize,

    // =========================================================================
    // Reclaimer Configuration
    // =========================================================================
    /// Pooler period in milliseconds.
    #[arg(long, default_value_t = 200, env = "TILES_POOLER_INTERVAL_MS")]
    pub pooler_interval_ms: u64,

    /// Swapper period in milliseconds.
    #[arg(long, default_value_t = 500, env = "TILES_SWAPPER_INTERVAL_MS")]
    pub swapper_interval_ms: u64,

    /// Directory for the swap file.
    ///
    /// If not specified, swapped tiles are kept in an in-memory backing store.
    #[arg(long, env = "TILES_SWAP_DIR")]
    pub swap_dir: Option<PathBuf>,

    // =========================================================================
    // Reporting Configuration
    // =========================================================================
    /// Seconds between statistics reports.
    #[arg(long, default_value_t = 1, env = "TILES_REPORT_INTERVAL_SECS")]
    pub report_interval_secs: u64,

    /// Statistics report format.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text, env = "TILES_FORMAT")]
    pub format: ReportFormat,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.threads == 0 {
            return Err("threads must be greater than 0".to_string());
        }
        if self.tiles_per_thread == 0 {
            return Err("tiles_per_thread must be greater than 0".to_string());
        }
        if self.pixel_size == 0 || self.pixel_size > 64 {
            return Err("pixel_size must be between 1 and 64".to_string());
        }
        if self.report_interval_secs == 0 {
            return Err("report_interval_secs must be greater than 0".to_string());
        }

        self.store_config().validate()
    }

    /// Store configuration derived from the command line.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            pooler: PoolerConfig {
                interval: Duration::from_millis(self.pooler_interval_ms),
                pool_limit_bytes: self.pool_limit_mib * MIB,
                ..PoolerConfig::default()
            },
            swapper: SwapperConfig {
                interval: Duration::from_millis(self.swapper_interval_ms),
                soft_limit_bytes: self.soft_limit_mib * MIB,
                hard_limit_bytes: self.hard_limit_mib * MIB,
                ..SwapperConfig::default()
            },
            background_workers: true,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

// =============================================================================
// Tests
// =============================================================================
