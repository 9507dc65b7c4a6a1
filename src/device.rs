//! Memory-backed block device
//!
//! A device owns its backing store, a FIFO of pending requests and the lock
//! that serializes everything touching either of them.

use crate::request::{Completion, Request, RequestError};
use crate::storage::{MemoryStore, StorageResult};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Stable device identity, assigned at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable device metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    /// Presentation name (xda, xdb, ...)
    pub name: String,
    /// Capacity in bytes, a multiple of `sector_size`
    pub capacity_bytes: u64,
    /// Logical sector size in bytes
    pub sector_size: u32,
}

impl DeviceInfo {
    /// Number of logical sectors
    pub fn sector_count(&self) -> u64 {
        self.capacity_bytes / u64::from(self.sector_size)
    }

    /// Capacity in 512-byte kernel sectors, whatever the logical sector size
    pub fn kernel_sectors(&self) -> u64 {
        self.capacity_bytes / 512
    }
}

/// A queued request and the channel its completion goes back on
pub(crate) struct Pending {
    pub request: Request,
    pub reply: Sender<Completion>,
}

/// State guarded by the device lock
pub(crate) struct DeviceState {
    pub store: MemoryStore,
    pub queue: VecDeque<Pending>,
    pub stopping: bool,
}

/// A memory-backed block device
pub struct Device {
    info: DeviceInfo,
    state: Mutex<DeviceState>,
    wakeup: Condvar,
}

impl Device {
    /// Allocate a device of `capacity_bytes`.
    ///
    /// `capacity_bytes` must be a multiple of `sector_size`; the registry
    /// validates this before any device is created.
    pub fn create(
        id: DeviceId,
        name: String,
        capacity_bytes: u64,
        sector_size: u32,
    ) -> StorageResult<Self> {
        debug_assert!(sector_size > 0 && capacity_bytes % u64::from(sector_size) == 0);

        let store = MemoryStore::allocate(capacity_bytes)?;

        log::info!(
            "Created device {} ({}): {} bytes, {} byte sectors",
            id,
            name,
            capacity_bytes,
            sector_size
        );

        Ok(Self {
            info: DeviceInfo {
                id,
                name,
                capacity_bytes,
                sector_size,
            },
            state: Mutex::new(DeviceState {
                store,
                queue: VecDeque::new(),
                stopping: false,
            }),
            wakeup: Condvar::new(),
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn id(&self) -> DeviceId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.info.capacity_bytes
    }

    pub fn sector_size(&self) -> u32 {
        self.info.sector_size
    }

    /// Push a request onto the pending queue and wake the dispatcher.
    ///
    /// Returns immediately; the completion is sent on `reply`. A device that is
    /// being torn down fails the request with [`RequestError::DeviceRemoved`].
    pub fn enqueue(&self, request: Request, reply: Sender<Completion>) {
        let mut state = self.lock_state();
        if state.stopping {
            drop(state);
            log::warn!("Request {} for removed device {}", request.tag, self.info.id);
            Completion {
                device: self.info.id,
                request,
                result: Err(RequestError::DeviceRemoved(self.info.id)),
            }
            .deliver(&reply);
            return;
        }

        log::trace!(
            "Enqueue on {}: tag={} {} sector={} count={}",
            self.info.name,
            request.tag,
            request.direction,
            request.sector_offset,
            request.sector_count
        );
        state.queue.push_back(Pending { request, reply });
        self.wakeup.notify_one();
    }

    /// Stop accepting requests and wake any waiting dispatcher
    pub(crate) fn stop(&self) {
        self.lock_state().stopping = true;
        self.wakeup.notify_all();
    }

    /// Fail everything still queued; returns how many requests were failed
    pub(crate) fn fail_pending(&self) -> usize {
        let drained: Vec<Pending> = self.lock_state().queue.drain(..).collect();
        let count = drained.len();
        for pending in drained {
            Completion {
                device: self.info.id,
                request: pending.request,
                result: Err(RequestError::DeviceRemoved(self.info.id)),
            }
            .deliver(&pending.reply);
        }
        if count > 0 {
            log::warn!("Failed {} pending request(s) on {}", count, self.info.name);
        }
        count
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        // Bounds are checked before any byte moves, so a poisoned lock never
        // guards a partial copy.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait<'a>(
        &self,
        guard: MutexGuard<'a, DeviceState>,
    ) -> MutexGuard<'a, DeviceState> {
        self.wakeup
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device").field("info", &self.info).finish()
    }
}
