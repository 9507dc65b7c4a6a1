//! In-memory backing store
//!
//! A contiguous heap region sized to the device capacity. Allocation is
//! fallible so an oversized device is reported instead of aborting the process.

use super::{BackingStore, StorageError, StorageResult};

/// Heap-allocated block storage
pub struct MemoryStore {
    data: Vec<u8>,
}

impl MemoryStore {
    /// Allocate a zero-filled region of `capacity_bytes`
    pub fn allocate(capacity_bytes: u64) -> StorageResult<Self> {
        let len = usize::try_from(capacity_bytes)
            .map_err(|_| StorageError::AllocationFailure { bytes: capacity_bytes })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            log::error!("backing store allocation of {} bytes failed: {}", len, e);
            StorageError::AllocationFailure { bytes: capacity_bytes }
        })?;
        data.resize(len, 0);

        Ok(Self { data })
    }

    /// View the whole region
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl BackingStore for MemoryStore {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) {
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) {
        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("len", &self.data.len())
            .finish()
    }
}
