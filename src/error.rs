use thiserror::Error;

use crate::tile::TileDataId;

/// Errors raised by a swap backing store.
#[derive(Debug, Error)]
pub enum SwapError {
    /// I/O error from the swap file
    #[error("Swap I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing store holds no copy of the requested tile data
    #[error("Tile data {0} is not present in the swap store")]
    NotFound(TileDataId),

    /// Stored length does not match the length the caller expects
    #[error("Swapped tile data {id} has {actual} bytes, expected {expected}")]
    SizeMismatch {
        id: TileDataId,
        expected: usize,
        actual: usize,
    },
}

/// Errors surfaced by the tile-data store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Swap backing store failure while paging a payload in or out
    #[error("Swap error: {0}")]
    Swap(#[from] SwapError),

    /// A background reclaimer thread could not be started
    #[error("Failed to start {name} thread: {source}")]
    WorkerSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Payload was absent right after a successful load
    #[error("Payload of tile data {0} vanished while locked")]
    PayloadMissing(TileDataId),

    /// Store configuration rejected by validation
    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),
}
