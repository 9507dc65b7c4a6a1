//! Backing stores
//!
//! This module defines the BackingStore trait, the in-memory implementation
//! and the transfer engine that moves sectors between a store and a caller buffer.

pub mod memory;
pub mod transfer;

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to allocate {bytes} bytes of backing store")]
    AllocationFailure { bytes: u64 },

    #[error("out of bounds: offset={offset} len={len} capacity={capacity}")]
    OutOfBounds { offset: u64, len: u64, capacity: u64 },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: u64, actual: usize },
}

impl StorageError {
    /// Convert to the errno reported to the request originator
    pub fn to_errno(&self) -> i32 {
        match self {
            StorageError::AllocationFailure { .. } => libc::ENOMEM,
            StorageError::OutOfBounds { .. } | StorageError::BufferSize { .. } => libc::EIO,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Raw byte region backing one device.
///
/// Offsets and lengths are validated by [`transfer::transfer`] before they reach
/// a store, so implementations do no bounds checking of their own.
pub trait BackingStore: Send {
    /// Total size of the region in bytes
    fn len(&self) -> u64;

    /// True if the region holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    fn read_at(&self, offset: u64, buf: &mut [u8]);

    /// Copy `data` into the region starting at `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]);
}

pub use memory::MemoryStore;
pub use transfer::{transfer, Direction};
