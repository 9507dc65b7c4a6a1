//! Geometry advisor and control commands
//!
//! Synthesizes a legacy cylinder/head/sector description from a device's
//! capacity, and answers control queries out of the read/write path.

use crate::device::Device;
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use thiserror::Error;

/// Heads reported in the synthesized geometry
pub const HEADS: u8 = 4;

/// Sectors per track reported in the synthesized geometry
pub const SECTORS_PER_TRACK: u8 = 16;

/// Control code for the geometry query (HDIO_GETGEO)
pub const HDIO_GETGEO: u32 = 0x0301;

/// Size of the encoded `hd_geometry` structure
pub const HD_GEOMETRY_SIZE: usize = 16;

/// Legacy CHS geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub heads: u8,
    pub sectors_per_track: u8,
    pub cylinders: u64,
    /// First sector of the data area
    pub start_offset: u64,
}

impl Geometry {
    /// Derive the geometry for a device of `capacity_bytes`.
    ///
    /// The sector total is estimated from the capacity in kilobytes, not the
    /// exact sector count; consumers depend on these numbers staying put.
    pub fn from_capacity(capacity_bytes: u64) -> Self {
        let total_sectors = (capacity_bytes / 1024) * 2;
        let cylinders = total_sectors / u64::from(HEADS) / u64::from(SECTORS_PER_TRACK);

        Self {
            heads: HEADS,
            sectors_per_track: SECTORS_PER_TRACK,
            cylinders,
            start_offset: u64::from(SECTORS_PER_TRACK),
        }
    }

    /// Encode as the C `hd_geometry` structure (LP64 layout, little-endian).
    ///
    /// Cylinders saturate at `u16::MAX`.
    pub fn to_hd_geometry(&self) -> [u8; HD_GEOMETRY_SIZE] {
        let mut out = [0u8; HD_GEOMETRY_SIZE];
        let cylinders = u16::try_from(self.cylinders).unwrap_or(u16::MAX);

        out[0] = self.heads;
        out[1] = self.sectors_per_track;
        LittleEndian::write_u16(&mut out[2..4], cylinders);
        // bytes 4..8 are padding before the 64-bit start field
        LittleEndian::write_u64(&mut out[8..16], self.start_offset);
        out
    }
}

/// Control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    GetGeometry,
}

impl TryFrom<u32> for ControlCommand {
    type Error = ControlError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            HDIO_GETGEO => Ok(ControlCommand::GetGeometry),
            other => Err(ControlError::UnknownCommand(other)),
        }
    }
}

/// Control command response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    Geometry(Geometry),
}

/// Control errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("unknown control command: 0x{0:04X}")]
    UnknownCommand(u32),
}

impl ControlError {
    /// Convert to the errno reported to the caller
    pub fn to_errno(&self) -> i32 {
        match self {
            ControlError::UnknownCommand(_) => libc::ENOTTY,
        }
    }
}

/// Operations a block device type offers outside the request path
pub trait BlockOps {
    /// Capacity in bytes, fixed for the device's lifetime
    fn capacity_bytes(&self) -> u64;

    /// Legacy geometry for this device
    fn compute_geometry(&self) -> Geometry {
        Geometry::from_capacity(self.capacity_bytes())
    }

    /// Answer a control command. `arg` is reserved for commands that take one.
    fn handle_control_command(
        &self,
        command: u32,
        _arg: u64,
    ) -> Result<ControlResponse, ControlError> {
        match ControlCommand::try_from(command) {
            Ok(ControlCommand::GetGeometry) => {
                Ok(ControlResponse::Geometry(self.compute_geometry()))
            }
            Err(e) => {
                log::warn!("{}", e);
                Err(e)
            }
        }
    }
}

impl BlockOps for Device {
    fn capacity_bytes(&self) -> u64 {
        Device::capacity_bytes(self)
    }
}
