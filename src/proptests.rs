//! Property tests for the transfer engine and geometry
//!
//! Any in-bounds range round-trips; any range past the end is rejected
//! without touching the store.

use crate::geometry::Geometry;
use crate::storage::{transfer, Direction, MemoryStore, StorageError};
use proptest::prelude::*;

const SECTOR_SIZE: u32 = 512;
const DISK_SECTORS: u64 = 256;
const CAPACITY: u64 = DISK_SECTORS * SECTOR_SIZE as u64;

fn in_bounds_range() -> impl Strategy<Value = (u64, u64)> {
    (0..DISK_SECTORS).prop_flat_map(|offset| (Just(offset), 0..=DISK_SECTORS - offset))
}

fn out_of_bounds_range() -> impl Strategy<Value = (u64, u64)> {
    // Start anywhere up to a little past the end, then overshoot by at least one sector.
    (0..DISK_SECTORS + 8).prop_flat_map(|offset| {
        let min_count = (DISK_SECTORS + 1).saturating_sub(offset).max(1);
        (Just(offset), min_count..min_count + 16)
    })
}

proptest! {
    #[test]
    fn write_then_read_round_trips((offset, count) in in_bounds_range(), seed in any::<u8>()) {
        let mut store = MemoryStore::allocate(CAPACITY).unwrap();
        let len = (count * SECTOR_SIZE as u64) as usize;

        let mut data: Vec<u8> = (0..len).map(|i| seed.wrapping_add(i as u8)).collect();
        let written = data.clone();
        transfer(&mut store, SECTOR_SIZE, offset, count, &mut data, Direction::Write).unwrap();

        let mut out = vec![0u8; len];
        transfer(&mut store, SECTOR_SIZE, offset, count, &mut out, Direction::Read).unwrap();
        prop_assert_eq!(out, written);
    }

    #[test]
    fn out_of_bounds_leaves_store_unchanged((offset, count) in out_of_bounds_range()) {
        let mut store = MemoryStore::allocate(CAPACITY).unwrap();
        let mut fill = vec![0x5Au8; CAPACITY as usize];
        transfer(&mut store, SECTOR_SIZE, 0, DISK_SECTORS, &mut fill, Direction::Write).unwrap();

        let len = (count * SECTOR_SIZE as u64) as usize;
        let mut data = vec![0xA5u8; len];
        let result = transfer(&mut store, SECTOR_SIZE, offset, count, &mut data, Direction::Write);
        prop_assert!(matches!(result, Err(StorageError::OutOfBounds { .. })), "expected OutOfBounds, got {:?}", result);
        prop_assert!(store.as_slice().iter().all(|&b| b == 0x5A));

        let mut out = vec![0u8; len];
        let result = transfer(&mut store, SECTOR_SIZE, offset, count, &mut out, Direction::Read);
        prop_assert!(matches!(result, Err(StorageError::OutOfBounds { .. })), "expected OutOfBounds, got {:?}", result);
        prop_assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn geometry_is_pure(size_mb in 1u64..65536) {
        let capacity = size_mb * 1024 * 1024;
        let geo = Geometry::from_capacity(capacity);
        prop_assert_eq!(geo, Geometry::from_capacity(capacity));
        prop_assert_eq!(geo.cylinders, ((capacity / 1024) * 2) / 4 / 16);
        prop_assert_eq!(geo.start_offset, 16);
    }
}
