//! Transfer engine
//!
//! Bounds-checked sector copies between a backing store and a caller buffer.
//! A transfer either moves the whole range or touches nothing.

use super::{BackingStore, StorageError, StorageResult};
use serde::Serialize;
use std::fmt;

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Store to buffer
    Read,
    /// Buffer to store
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
        }
    }
}

/// Compute the byte range `(offset, length)` covered by a sector range,
/// failing if it does not lie entirely within `capacity`.
///
/// The arithmetic is done in `u128`, so a range whose end does not fit in
/// 64 bits is reported as out of bounds like any other range past the end.
pub fn byte_range(
    sector_size: u32,
    sector_offset: u64,
    sector_count: u64,
    capacity: u64,
) -> StorageResult<(u64, u64)> {
    let sector_size = u128::from(sector_size);
    let offset = u128::from(sector_offset) * sector_size;
    let len = u128::from(sector_count) * sector_size;

    if offset + len > u128::from(capacity) {
        return Err(StorageError::OutOfBounds {
            offset: saturate(offset),
            len: saturate(len),
            capacity,
        });
    }

    // Both fit: their sum is at most `capacity`
    Ok((offset as u64, len as u64))
}

fn saturate(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Move `sector_count` sectors starting at `sector_offset` between `store` and `buffer`.
///
/// `buffer` must be exactly `sector_count * sector_size` bytes. For
/// [`Direction::Write`] it is the source, for [`Direction::Read`] the destination.
pub fn transfer(
    store: &mut dyn BackingStore,
    sector_size: u32,
    sector_offset: u64,
    sector_count: u64,
    buffer: &mut [u8],
    direction: Direction,
) -> StorageResult<()> {
    let (offset, len) = byte_range(sector_size, sector_offset, sector_count, store.len())
        .map_err(|e| {
            log::warn!(
                "beyond-end {} rejected: sector {} count {}: {}",
                direction,
                sector_offset,
                sector_count,
                e
            );
            e
        })?;

    if buffer.len() as u64 != len {
        return Err(StorageError::BufferSize {
            expected: len,
            actual: buffer.len(),
        });
    }

    match direction {
        Direction::Write => store.write_at(offset, buffer),
        Direction::Read => store.read_at(offset, buffer),
    }

    log::trace!("{} {} bytes at offset {}", direction, len, offset);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_write_then_read_sector_zero() {
        let mut store = MemoryStore::allocate(4 * MIB).unwrap();

        let mut pattern = vec![0xAA; 512];
        transfer(&mut store, 512, 0, 1, &mut pattern, Direction::Write).unwrap();

        let mut out = vec![0u8; 512];
        transfer(&mut store, 512, 0, 1, &mut out, Direction::Read).unwrap();
        assert_eq!(out, vec![0xAA; 512]);
    }

    #[test]
    fn test_read_one_past_end() {
        let mut store = MemoryStore::allocate(4 * MIB).unwrap();

        let mut out = vec![0u8; 512];
        let result = transfer(&mut store, 512, 8192, 1, &mut out, Direction::Read);
        assert!(matches!(result, Err(StorageError::OutOfBounds { .. })));
    }

    #[test]
    fn test_last_sector_is_addressable() {
        let mut store = MemoryStore::allocate(4 * MIB).unwrap();

        let mut data = vec![0x5A; 512];
        transfer(&mut store, 512, 8191, 1, &mut data, Direction::Write).unwrap();
        assert_eq!(&store.as_slice()[(4 * MIB - 512) as usize..], &data[..]);
    }

    #[test]
    fn test_straddling_write_leaves_store_untouched() {
        let mut store = MemoryStore::allocate(8 * 512).unwrap();

        let mut data = vec![0xFF; 2 * 512];
        let result = transfer(&mut store, 512, 7, 2, &mut data, Direction::Write);
        assert!(matches!(result, Err(StorageError::OutOfBounds { .. })));
        assert!(store.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_uses_device_sector_size() {
        let mut store = MemoryStore::allocate(16 * 4096).unwrap();

        let mut data = vec![0x11; 4096];
        transfer(&mut store, 4096, 3, 1, &mut data, Direction::Write).unwrap();
        assert_eq!(store.as_slice()[3 * 4096], 0x11);
        assert_eq!(store.as_slice()[3 * 4096 - 1], 0);
    }

    #[test]
    fn test_overflowing_range_is_out_of_bounds() {
        let mut store = MemoryStore::allocate(4096).unwrap();

        let mut out = vec![];
        let result = transfer(&mut store, 512, u64::MAX, 0, &mut out, Direction::Read);
        assert!(matches!(
            result,
            Err(StorageError::OutOfBounds { offset: u64::MAX, len: 0, capacity: 4096 })
        ));

        let result = transfer(&mut store, 4096, 1, u64::MAX, &mut out, Direction::Write);
        assert!(matches!(
            result,
            Err(StorageError::OutOfBounds { len: u64::MAX, .. })
        ));
        assert!(store.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_buffer_size_mismatch() {
        let mut store = MemoryStore::allocate(4096).unwrap();

        let mut data = vec![0x22; 100];
        let result = transfer(&mut store, 512, 0, 1, &mut data, Direction::Write);
        assert!(matches!(
            result,
            Err(StorageError::BufferSize { expected: 512, actual: 100 })
        ));
        assert!(store.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_count_at_end_is_ok() {
        let mut store = MemoryStore::allocate(4096).unwrap();

        let mut out = vec![];
        transfer(&mut store, 512, 8, 0, &mut out, Direction::Read).unwrap();
    }
}
