//! Device registry
//!
//! Creates the configured devices at startup, hands each one to its own
//! dispatcher, routes requests and control queries by handle, and tears
//! everything down at shutdown.

use crate::config::{AllocationPolicy, ConfigError, DeviceConfig};
use crate::device::{Device, DeviceId, DeviceInfo};
use crate::dispatch::Dispatcher;
use crate::geometry::{BlockOps, ControlError, ControlResponse};
use crate::request::{Completion, Request};
use crate::storage::{StorageError, StorageResult};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use thiserror::Error;

/// Handle for a registered device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(DeviceId);

impl DeviceHandle {
    pub fn id(&self) -> DeviceId {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("device {device} allocation failed: {source}")]
    Allocation {
        device: DeviceId,
        #[source]
        source: StorageError,
    },

    #[error("device {0} already registered")]
    DuplicateDevice(DeviceId),

    #[error("unknown device {0}")]
    UnknownDevice(DeviceHandle),

    #[error("device {0} dropped a request without completing it")]
    Disconnected(DeviceId),

    #[error("failed to start dispatcher: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("control error: {0}")]
    Control(#[from] ControlError),
}

impl RegistryError {
    /// Convert to the errno reported to the caller
    pub fn to_errno(&self) -> i32 {
        match self {
            RegistryError::InvalidConfig(_) => libc::EINVAL,
            RegistryError::Allocation { .. } => libc::ENOMEM,
            RegistryError::DuplicateDevice(_) => libc::EEXIST,
            RegistryError::UnknownDevice(_) | RegistryError::Disconnected(_) => libc::ENODEV,
            RegistryError::Spawn(_) => libc::EAGAIN,
            RegistryError::Control(e) => e.to_errno(),
        }
    }
}

/// A device left out at startup
#[derive(Debug)]
pub struct FailedDevice {
    pub id: DeviceId,
    pub name: String,
    pub error: StorageError,
}

struct Entry {
    device: Arc<Device>,
    dispatcher: Dispatcher,
}

/// Owns every live device and its dispatcher
pub struct DeviceRegistry {
    entries: BTreeMap<DeviceId, Entry>,
    failed: Vec<FailedDevice>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            failed: Vec::new(),
        }
    }

    /// Create and register `config.count` devices
    pub fn create_devices(config: &DeviceConfig) -> Result<Self, RegistryError> {
        Self::create_devices_with(config, Device::create)
    }

    /// Create devices using `alloc` to build each one.
    ///
    /// A device that fails to allocate is handled according to
    /// `config.on_allocation_failure`.
    pub fn create_devices_with<F>(config: &DeviceConfig, mut alloc: F) -> Result<Self, RegistryError>
    where
        F: FnMut(DeviceId, String, u64, u32) -> StorageResult<Device>,
    {
        config.validate()?;
        let capacity = config
            .capacity_bytes()
            .ok_or_else(|| ConfigError::Invalid("device size overflows".to_string()))?;

        let mut registry = Self::new();

        for index in 0..config.count {
            let id = DeviceId(index);
            let name = disk_name(&config.name_prefix, index);

            match alloc(id, name.clone(), capacity, config.sector_size) {
                Ok(device) => {
                    registry.register(device)?;
                }
                Err(error) => match config.on_allocation_failure {
                    AllocationPolicy::Skip => {
                        log::error!("Device {} ({}) left unregistered: {}", id, name, error);
                        registry.failed.push(FailedDevice { id, name, error });
                    }
                    AllocationPolicy::Abort => {
                        log::error!("Device {} ({}) failed, aborting startup: {}", id, name, error);
                        registry.destroy();
                        return Err(RegistryError::Allocation { device: id, source: error });
                    }
                },
            }
        }

        log::info!(
            "Registered {} of {} device(s), {} MiB each",
            registry.len(),
            config.count,
            config.size_mb
        );

        Ok(registry)
    }

    /// Register a device and start its dispatcher
    pub fn register(&mut self, device: Device) -> Result<DeviceHandle, RegistryError> {
        let id = device.id();
        if self.entries.contains_key(&id) {
            return Err(RegistryError::DuplicateDevice(id));
        }

        let device = Arc::new(device);
        let dispatcher = Dispatcher::spawn(Arc::clone(&device))?;
        log::info!("Registered {} as device {}", device.name(), id);
        self.entries.insert(id, Entry { device, dispatcher });

        Ok(DeviceHandle(id))
    }

    /// Stop a device's dispatcher, fail its pending requests and release it
    pub fn unregister(&mut self, handle: DeviceHandle) -> Result<DeviceInfo, RegistryError> {
        let entry = self
            .entries
            .remove(&handle.0)
            .ok_or(RegistryError::UnknownDevice(handle))?;

        entry.dispatcher.stop();
        entry.device.fail_pending();
        let info = entry.device.info().clone();

        log::info!("Unregistered {} (device {})", info.name, info.id);
        Ok(info)
    }

    /// Unregister every device
    pub fn destroy(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let handles: Vec<DeviceHandle> = self.handles();
        for handle in handles {
            if let Err(e) = self.unregister(handle) {
                log::warn!("Failed to unregister device {}: {}", handle, e);
            }
        }
    }

    /// Queue a request; the completion is sent on `reply`
    pub fn enqueue(
        &self,
        handle: DeviceHandle,
        request: Request,
        reply: Sender<Completion>,
    ) -> Result<(), RegistryError> {
        let entry = self.entry(handle)?;
        entry.device.enqueue(request, reply);
        Ok(())
    }

    /// Queue a request and wait for its completion
    pub fn submit(&self, handle: DeviceHandle, request: Request) -> Result<Completion, RegistryError> {
        let (tx, rx) = mpsc::channel();
        self.enqueue(handle, request, tx)?;
        rx.recv().map_err(|_| RegistryError::Disconnected(handle.0))
    }

    /// Answer a control command for a device
    pub fn control(
        &self,
        handle: DeviceHandle,
        command: u32,
        arg: u64,
    ) -> Result<ControlResponse, RegistryError> {
        let entry = self.entry(handle)?;
        Ok(entry.device.handle_control_command(command, arg)?)
    }

    /// Look up a device
    pub fn device(&self, handle: DeviceHandle) -> Option<&Arc<Device>> {
        self.entries.get(&handle.0).map(|entry| &entry.device)
    }

    /// Handle for a device id, if it is registered
    pub fn handle(&self, id: DeviceId) -> Option<DeviceHandle> {
        self.entries.contains_key(&id).then_some(DeviceHandle(id))
    }

    /// Handles of all registered devices, in id order
    pub fn handles(&self) -> Vec<DeviceHandle> {
        self.entries.keys().copied().map(DeviceHandle).collect()
    }

    /// Devices left out at startup
    pub fn failed(&self) -> &[FailedDevice] {
        &self.failed
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, handle: DeviceHandle) -> Result<&Entry, RegistryError> {
        self.entries
            .get(&handle.0)
            .ok_or(RegistryError::UnknownDevice(handle))
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Device name for `index`: prefix followed by a, b, ..., z, aa, ab, ...
pub fn disk_name(prefix: &str, index: u32) -> String {
    let mut suffix = Vec::new();
    let mut n = index;
    loop {
        suffix.push(b'a' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    suffix.reverse();

    format!("{}{}", prefix, String::from_utf8_lossy(&suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Geometry, HDIO_GETGEO};
    use crate::request::RequestError;

    fn config(count: u32) -> DeviceConfig {
        DeviceConfig {
            count,
            size_mb: 1,
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn test_disk_names() {
        assert_eq!(disk_name("xd", 0), "xda");
        assert_eq!(disk_name("xd", 3), "xdd");
        assert_eq!(disk_name("xd", 25), "xdz");
        assert_eq!(disk_name("xd", 26), "xdaa");
        assert_eq!(disk_name("xd", 27), "xdab");
        assert_eq!(disk_name("xd", 26 + 26 * 26), "xdaaa");
    }

    #[test]
    fn test_create_devices() {
        let registry = DeviceRegistry::create_devices(&config(4)).unwrap();
        assert_eq!(registry.len(), 4);
        assert!(registry.failed().is_empty());

        let names: Vec<String> = registry
            .handles()
            .into_iter()
            .map(|h| registry.device(h).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["xda", "xdb", "xdc", "xdd"]);

        registry.destroy();
    }

    #[test]
    fn test_zero_count_rejected() {
        let result = DeviceRegistry::create_devices(&config(0));
        assert!(matches!(result, Err(RegistryError::InvalidConfig(_))));
    }

    #[test]
    fn test_allocation_failure_skips_device() {
        let registry = DeviceRegistry::create_devices_with(&config(3), |id, name, cap, ss| {
            if id == DeviceId(1) {
                Err(StorageError::AllocationFailure { bytes: cap })
            } else {
                Device::create(id, name, cap, ss)
            }
        })
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.failed().len(), 1);
        assert_eq!(registry.failed()[0].name, "xdb");
        assert!(registry.handle(DeviceId(1)).is_none());

        let handle = registry.handle(DeviceId(2)).unwrap();
        let completion = registry
            .submit(handle, Request::write(1, 0, vec![0x33; 512], 512))
            .unwrap();
        assert!(completion.is_ok());
    }

    #[test]
    fn test_allocation_failure_aborts() {
        let cfg = DeviceConfig {
            on_allocation_failure: AllocationPolicy::Abort,
            ..config(3)
        };
        let result = DeviceRegistry::create_devices_with(&cfg, |id, name, cap, ss| {
            if id == DeviceId(2) {
                Err(StorageError::AllocationFailure { bytes: cap })
            } else {
                Device::create(id, name, cap, ss)
            }
        });

        match result {
            Err(err @ RegistryError::Allocation { .. }) => assert_eq!(err.to_errno(), libc::ENOMEM),
            other => panic!("expected allocation error, got {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn test_unknown_handle() {
        let mut registry = DeviceRegistry::create_devices(&config(1)).unwrap();
        let handle = registry.handles()[0];
        registry.unregister(handle).unwrap();

        let result = registry.submit(handle, Request::read(1, 0, 1, 512));
        assert!(matches!(result, Err(RegistryError::UnknownDevice(_))));
        assert!(matches!(
            registry.unregister(handle),
            Err(RegistryError::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_duplicate_register() {
        let mut registry = DeviceRegistry::new();
        let dev = Device::create(DeviceId(0), "xda".to_string(), 1024 * 1024, 512).unwrap();
        registry.register(dev).unwrap();

        let dup = Device::create(DeviceId(0), "xda".to_string(), 1024 * 1024, 512).unwrap();
        assert!(matches!(
            registry.register(dup),
            Err(RegistryError::DuplicateDevice(DeviceId(0)))
        ));
    }

    #[test]
    fn test_control() {
        let registry = DeviceRegistry::create_devices(&config(1)).unwrap();
        let handle = registry.handles()[0];

        let response = registry.control(handle, HDIO_GETGEO, 0).unwrap();
        assert_eq!(
            response,
            ControlResponse::Geometry(Geometry::from_capacity(1024 * 1024))
        );

        let err = registry.control(handle, 0xBEEF, 0).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Control(ControlError::UnknownCommand(0xBEEF))
        ));
        assert_eq!(err.to_errno(), libc::ENOTTY);
    }

    #[test]
    fn test_non_storage_request() {
        let registry = DeviceRegistry::create_devices(&config(1)).unwrap();
        let handle = registry.handles()[0];

        let completion = registry.submit(handle, Request::non_storage(4)).unwrap();
        assert!(matches!(
            completion.result,
            Err(RequestError::UnsupportedRequestType)
        ));
    }
}
