//! Memory-backed block devices
//!
//! This crate emulates a set of independent sector-addressed block devices whose
//! contents live entirely in memory. Each device serializes its requests through
//! a dedicated dispatcher, and answers geometry queries for legacy CHS consumers.

pub mod config;
pub mod device;
pub mod dispatch;
pub mod geometry;
pub mod registry;
pub mod request;
pub mod storage;

#[cfg(test)]
mod proptests;

pub use config::Config;
pub use device::{Device, DeviceId, DeviceInfo};
pub use geometry::{BlockOps, ControlCommand, ControlError, ControlResponse, Geometry};
pub use registry::{DeviceHandle, DeviceRegistry, RegistryError};
pub use request::{Completion, Request, RequestError, RequestKind};
pub use storage::{Direction, StorageError};
