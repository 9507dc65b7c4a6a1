//! Request dispatcher
//!
//! Drains a device's pending queue one request at a time. Each request moves
//! through fetch, classify, transfer and complete while the device lock is
//! held, so requests for one device never overlap and complete in FIFO order.
//! Different devices have independent locks and workers.

use crate::device::{Device, DeviceInfo, DeviceState, Pending};
use crate::request::{Completion, RequestError, RequestKind};
use crate::storage::transfer;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Dispatcher states for a single request
enum Step {
    Fetching,
    Classifying(Pending),
    Transferring(Pending),
    Failing(Pending, RequestError),
    Completing(Pending),
}

/// Resolve the request at the head of the queue.
///
/// The caller holds the device lock for the whole call. Returns false if the
/// queue was empty (the dispatcher is idle).
pub(crate) fn dispatch_one(info: &DeviceInfo, state: &mut DeviceState) -> bool {
    let mut step = Step::Fetching;

    loop {
        step = match step {
            Step::Fetching => match state.queue.pop_front() {
                Some(pending) => Step::Classifying(pending),
                None => return false,
            },
            Step::Classifying(pending) => match pending.request.kind {
                RequestKind::Storage => Step::Transferring(pending),
                RequestKind::NonStorage => {
                    log::warn!(
                        "Skip non-storage request {} on {}",
                        pending.request.tag,
                        info.name
                    );
                    Step::Failing(pending, RequestError::UnsupportedRequestType)
                }
            },
            Step::Transferring(mut pending) => {
                let request = &mut pending.request;
                let result = transfer(
                    &mut state.store,
                    info.sector_size,
                    request.sector_offset,
                    request.sector_count,
                    &mut request.buffer,
                    request.direction,
                );
                match result {
                    Ok(()) => Step::Completing(pending),
                    Err(e) => Step::Failing(pending, e.into()),
                }
            }
            Step::Failing(pending, error) => {
                log::debug!(
                    "Request {} on {} failed: {}",
                    pending.request.tag,
                    info.name,
                    error
                );
                complete(info, pending, Err(error));
                return true;
            }
            Step::Completing(pending) => {
                log::debug!(
                    "Request {} on {} complete: {} sector={} count={}",
                    pending.request.tag,
                    info.name,
                    pending.request.direction,
                    pending.request.sector_offset,
                    pending.request.sector_count
                );
                complete(info, pending, Ok(()));
                return true;
            }
        };
    }
}

fn complete(info: &DeviceInfo, pending: Pending, result: Result<(), RequestError>) {
    Completion {
        device: info.id,
        request: pending.request,
        result,
    }
    .deliver(&pending.reply);
}

/// Process every request currently queued on `device`, in order.
///
/// The lock is taken per request and released in between, so enqueues can
/// interleave. Returns the number of requests resolved.
pub fn run_pending(device: &Device) -> usize {
    let mut resolved = 0;
    loop {
        let mut state = device.lock_state();
        if !dispatch_one(device.info(), &mut state) {
            return resolved;
        }
        resolved += 1;
    }
}

/// Worker thread draining one device's queue
pub struct Dispatcher {
    device: Arc<Device>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start a worker for `device`
    pub fn spawn(device: Arc<Device>) -> io::Result<Self> {
        let worker = Arc::clone(&device);
        let handle = thread::Builder::new()
            .name(format!("dispatch-{}", device.name()))
            .spawn(move || worker_loop(&worker))?;

        log::debug!("Dispatcher started for {}", device.name());
        Ok(Self {
            device,
            handle: Some(handle),
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Stop the worker after its current request and wait for it to exit.
    ///
    /// Requests still queued are left in place for the caller to fail.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.device.stop();
            if handle.join().is_err() {
                log::error!("Dispatcher for {} panicked", self.device.name());
            }
            log::debug!("Dispatcher stopped for {}", self.device.name());
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(device: &Device) {
    loop {
        let mut state = device.lock_state();
        loop {
            if state.stopping {
                return;
            }
            if !state.queue.is_empty() {
                break;
            }
            log::trace!("{} idle", device.name());
            state = device.wait(state);
        }
        dispatch_one(device.info(), &mut state);
    }
}
