//! File-backed swap store.
//!
//! Payloads are written to a single anonymous temporary file. Tile payloads
//! of one image share a size, so freed extents are recycled by exact length
//! before the file is grown.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::debug;

use super::{SwapBackingStore, SwapStatistics};
use crate::error::SwapError;
use crate::tile::TileDataId;

/// A region of the swap file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extent {
    offset: u64,
    len: usize,
}

struct FileSwapInner {
    file: File,
    /// Extents currently holding a swapped payload
    index: HashMap<TileDataId, Extent>,
    /// Free extent offsets, grouped by length
    free_extents: BTreeMap<usize, Vec<u64>>,
    /// End of the used part of the file
    file_len: u64,
    stored_bytes: u64,
    swap_outs: u64,
    swap_ins: u64,
}

impl FileSwapInner {
    fn allocate(&mut self, len: usize) -> Extent {
        if let Some(offsets) = self.free_extents.get_mut(&len) {
            if let Some(offset) = offsets.pop() {
                if offsets.is_empty() {
                    self.free_extents.remove(&len);
                }
                return Extent { offset, len };
            }
        }

        let extent = Extent {
            offset: self.file_len,
            len,
        };
        self.file_len += len as u64;
        extent
    }

    fn release(&mut self, extent: Extent) {
        self.free_extents
            .entry(extent.len)
            .or_default()
            .push(extent.offset);
    }
}

fn write_at(file: &mut File, offset: u64, data: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}

fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

/// Swap backing store writing payloads to a temporary file.
///
/// The file is unlinked on creation and disappears when the store is
/// dropped.
pub struct FileSwapStore {
    inner: Mutex<FileSwapInner>,
}

impl FileSwapStore {
    /// Create a swap file inside `dir`.
    pub fn create_in(dir: impl AsRef<Path>) -> Result<Self, SwapError> {
        let file = tempfile::tempfile_in(dir.as_ref())?;
        debug!(dir = %dir.as_ref().display(), "Created tile swap file");
        Ok(Self::from_file(file))
    }

    /// Create a swap file in the system temporary directory.
    pub fn create() -> Result<Self, SwapError> {
        Ok(Self::from_file(tempfile::tempfile()?))
    }

    fn from_file(file: File) -> Self {
        Self {
            inner: Mutex::new(FileSwapInner {
                file,
                index: HashMap::new(),
                free_extents: BTreeMap::new(),
                file_len: 0,
                stored_bytes: 0,
                swap_outs: 0,
                swap_ins: 0,
            }),
        }
    }
}

impl SwapBackingStore for FileSwapStore {
    fn swap_out_tile_data(&self, id: TileDataId, data: &[u8]) -> Result<(), SwapError> {
        let mut inner = self.inner.lock();

        // A stale extent for the same id would leak otherwise.
        if let Some(old) = inner.index.remove(&id) {
            inner.stored_bytes -= old.len as u64;
            inner.release(old);
        }

        let extent = inner.allocate(data.len());
        if let Err(e) = write_at(&mut inner.file, extent.offset, data) {
            inner.release(extent);
            return Err(e.into());
        }

        inner.index.insert(id, extent);
        inner.stored_bytes += extent.len as u64;
        inner.swap_outs += 1;
        Ok(())
    }

    fn swap_in_tile_data(&self, id: TileDataId, len: usize) -> Result<Box<[u8]>, SwapError> {
        let mut inner = self.inner.lock();

        let extent = *inner.index.get(&id).ok_or(SwapError::NotFound(id))?;
        if extent.len != len {
            return Err(SwapError::SizeMismatch {
                id,
                expected: len,
                actual: extent.len,
            });
        }

        let mut data = vec![0u8; len].into_boxed_slice();
        read_at(&mut inner.file, extent.offset, &mut data)?;

        inner.index.remove(&id);
        inner.stored_bytes -= extent.len as u64;
        inner.release(extent);
        inner.swap_ins += 1;
        Ok(data)
    }

    fn forget_tile_data(&self, id: TileDataId) {
        let mut inner = self.inner.lock();
        if let Some(extent) = inner.index.remove(&id) {
            inner.stored_bytes -= extent.len as u64;
            inner.release(extent);
        }
    }

    fn statistics(&self) -> SwapStatistics {
        let inner = self.inner.lock();
        SwapStatistics {
            stored_records: inner.index.len(),
            stored_bytes: inner.stored_bytes,
            swap_outs: inner.swap_outs,
            swap_ins: inner.swap_ins,
            file_bytes: inner.file_len,
        }
    }
}
