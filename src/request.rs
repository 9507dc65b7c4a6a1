//! Request descriptors and completions
//!
//! A request names a sector range, a direction and the buffer the data moves
//! through. It is handed back to its originator inside a [`Completion`] once
//! the dispatcher has resolved it.

use crate::device::DeviceId;
use crate::storage::{Direction, StorageError};
use std::sync::mpsc::Sender;
use thiserror::Error;

/// Request classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Sector transfer against the backing store
    Storage,
    /// Anything else the host queue may carry (packet commands, driver-private)
    NonStorage,
}

/// Request errors reported on completion
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("unsupported request type")]
    UnsupportedRequestType,

    #[error("device {0} removed")]
    DeviceRemoved(DeviceId),
}

impl RequestError {
    /// Convert to the errno reported to the request originator
    pub fn to_errno(&self) -> i32 {
        match self {
            RequestError::Storage(e) => e.to_errno(),
            RequestError::UnsupportedRequestType => libc::EIO,
            RequestError::DeviceRemoved(_) => libc::ENODEV,
        }
    }
}

/// A unit of work for one device
#[derive(Debug)]
pub struct Request {
    /// Originator tag for request/completion correlation
    pub tag: u64,
    /// First sector of the range
    pub sector_offset: u64,
    /// Number of sectors in the range
    pub sector_count: u64,
    /// Transfer direction
    pub direction: Direction,
    /// Request classification
    pub kind: RequestKind,
    /// Source for writes, destination for reads
    pub buffer: Vec<u8>,
}

impl Request {
    /// Read request with a zeroed buffer sized for `sector_count` sectors.
    ///
    /// A buffer that cannot be represented or allocated is left empty; the
    /// dispatcher then fails the request instead of the constructor aborting.
    pub fn read(tag: u64, sector_offset: u64, sector_count: u64, sector_size: u32) -> Self {
        Self {
            tag,
            sector_offset,
            sector_count,
            direction: Direction::Read,
            kind: RequestKind::Storage,
            buffer: zeroed_buffer(sector_count, sector_size),
        }
    }

    /// Write request carrying `data`, which must cover whole sectors
    pub fn write(tag: u64, sector_offset: u64, data: Vec<u8>, sector_size: u32) -> Self {
        let sector_count = data.len() as u64 / u64::from(sector_size.max(1));
        Self {
            tag,
            sector_offset,
            sector_count,
            direction: Direction::Write,
            kind: RequestKind::Storage,
            buffer: data,
        }
    }

    /// Request that is not a storage transfer
    pub fn non_storage(tag: u64) -> Self {
        Self {
            tag,
            sector_offset: 0,
            sector_count: 0,
            direction: Direction::Read,
            kind: RequestKind::NonStorage,
            buffer: Vec::new(),
        }
    }
}

fn zeroed_buffer(sector_count: u64, sector_size: u32) -> Vec<u8> {
    let len = sector_count
        .checked_mul(u64::from(sector_size))
        .and_then(|len| usize::try_from(len).ok());

    let mut buffer = Vec::new();
    match len {
        Some(len) if buffer.try_reserve_exact(len).is_ok() => buffer.resize(len, 0),
        _ => log::debug!("No read buffer for {} sectors of {} bytes", sector_count, sector_size),
    }
    buffer
}

/// Resolution of a request, sent back on the originator's channel
#[derive(Debug)]
pub struct Completion {
    /// Device that resolved the request
    pub device: DeviceId,
    /// The request, with its buffer filled for successful reads
    pub request: Request,
    /// Outcome
    pub result: Result<(), RequestError>,
}

impl Completion {
    /// Status code in errno convention: 0 on success, negative errno on failure
    pub fn status(&self) -> i32 {
        match &self.result {
            Ok(()) => 0,
            Err(e) => -e.to_errno(),
        }
    }

    /// True if the request completed successfully
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Report to the originator; a vanished originator is only logged
    pub fn deliver(self, reply: &Sender<Completion>) {
        if let Err(e) = reply.send(self) {
            log::debug!(
                "Originator of request {} on device {} went away",
                e.0.request.tag,
                e.0.device
            );
        }
    }
}
