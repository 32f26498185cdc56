//! Detached worker jobs
//!
//! Blocking native work runs on its own thread, touches only the native
//! stack, and posts its outcome back through the dispatcher.

use crate::domain::device::DeviceInfo;
use crate::domain::errors::NativeResult;
use crate::infrastructure::bluetooth::dispatcher::NativeEventDispatcher;
use crate::infrastructure::bluetooth::native::NativeStack;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

impl JobId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Result of a worker job, consumed on the script thread.
#[derive(Debug)]
pub enum WorkerOutcome {
    KnownDevices {
        job: JobId,
        result: NativeResult<Vec<DeviceInfo>>,
    },
}

impl WorkerOutcome {
    pub fn job(&self) -> JobId {
        match self {
            WorkerOutcome::KnownDevices { job, .. } => *job,
        }
    }
}

/// Enumerate bonded devices on a detached thread.
///
/// The thread waits for room in the task queue rather than dropping the
/// outcome.
pub fn spawn_known_devices_job(
    thread_name: &str,
    job: JobId,
    native: Arc<dyn NativeStack>,
    dispatcher: NativeEventDispatcher,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            debug!("Enumerating bonded devices for {:?}", job);
            let result = native.bonded_devices();
            let outcome = WorkerOutcome::KnownDevices { job, result };
            if let Err(e) = dispatcher.deliver_blocking(outcome) {
                error!("Failed to deliver known devices for {:?}: {}", job, e);
            }
        })
        .map(|_| ())
}
