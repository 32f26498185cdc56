//! Native Event Dispatcher
//!
//! The only handle the native stack and worker threads hold. It turns every
//! callback into a [`DispatchedTask`] on a bounded channel; the script
//! runtime drains that channel on its own thread.

use crate::infrastructure::bluetooth::native::NativeEvent;
use crate::infrastructure::bluetooth::worker::WorkerOutcome;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Work posted from a foreign thread to the script thread.
#[derive(Debug)]
pub enum DispatchedTask {
    Native(NativeEvent),
    Worker(WorkerOutcome),
}

pub type TaskReceiver = mpsc::Receiver<DispatchedTask>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("task queue is full")]
    QueueFull,
    #[error("script runtime has shut down")]
    Closed,
}

/// Cloneable, thread-safe sender half of the task channel.
#[derive(Debug, Clone)]
pub struct NativeEventDispatcher {
    sender: mpsc::Sender<DispatchedTask>,
}

impl NativeEventDispatcher {
    /// Create the dispatcher and the receiver the runtime drains.
    pub fn channel(capacity: usize) -> (Self, TaskReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue a native callback. A full queue drops the event.
    pub fn dispatch(&self, event: NativeEvent) -> Result<(), DispatchError> {
        debug!("Dispatching native event {:?}", event.subscription());
        self.enqueue(DispatchedTask::Native(event))
    }

    /// Enqueue the outcome of a worker job, waiting for room in the queue.
    ///
    /// Worker outcomes resolve a pending script callback and are never
    /// dropped for lack of room. Must be called from a plain thread, never
    /// from inside the tokio runtime. Fails only once the runtime has shut
    /// down, and shutdown has already released every pending job.
    pub fn deliver_blocking(&self, outcome: WorkerOutcome) -> Result<(), DispatchError> {
        debug!("Delivering worker outcome for {:?}", outcome.job());
        self.sender
            .blocking_send(DispatchedTask::Worker(outcome))
            .map_err(|e| {
                warn!("Script runtime is gone, dropping {:?}", e.0);
                DispatchError::Closed
            })
    }

    fn enqueue(&self, task: DispatchedTask) -> Result<(), DispatchError> {
        match self.sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => {
                warn!("Task queue is full, dropping {:?}", task);
                Err(DispatchError::QueueFull)
            }
            Err(TrySendError::Closed(task)) => {
                warn!("Script runtime is gone, dropping {:?}", task);
                Err(DispatchError::Closed)
            }
        }
    }
}
