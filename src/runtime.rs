//! Script Runtime
//!
//! Owns the adapter, the local task queue and the receiving end of the
//! native task channel, and runs all of them on the current thread.

use crate::domain::errors::BridgeError;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::dispatcher::{DispatchedTask, NativeEventDispatcher, TaskReceiver};
use crate::infrastructure::bluetooth::native::NativeStack;
use crate::infrastructure::bluetooth::BluetoothAdapter;
use crate::script::ScriptTaskQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

pub struct ScriptRuntime {
    adapter: BluetoothAdapter,
    tasks: ScriptTaskQueue,
    receiver: TaskReceiver,
}

impl ScriptRuntime {
    pub fn new(
        native: Arc<dyn NativeStack>,
        dispatcher: NativeEventDispatcher,
        receiver: TaskReceiver,
        settings: &Settings,
    ) -> Result<Self, BridgeError> {
        let tasks = ScriptTaskQueue::new();
        let adapter = BluetoothAdapter::new(native, dispatcher, tasks.clone(), settings)?;
        Ok(Self {
            adapter,
            tasks,
            receiver,
        })
    }

    pub fn adapter(&mut self) -> &mut BluetoothAdapter {
        &mut self.adapter
    }

    /// Handle for scheduling work from script callbacks.
    pub fn tasks(&self) -> ScriptTaskQueue {
        self.tasks.clone()
    }

    /// Run local tasks and already delivered native tasks until both are
    /// empty. Returns the number of tasks run.
    pub fn run_pending(&mut self) -> usize {
        let mut executed = 0;
        loop {
            if let Some(task) = self.tasks.pop() {
                task(&mut self.adapter);
                executed += 1;
                continue;
            }
            match self.receiver.try_recv() {
                Ok(task) => {
                    self.execute(task);
                    executed += 1;
                }
                Err(_) => break,
            }
        }
        executed
    }

    /// Like [`run_pending`](Self::run_pending), but also waits for native
    /// tasks while worker jobs are outstanding.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut executed = self.run_pending();
        while self.adapter.has_pending_jobs() {
            match self.receiver.recv().await {
                Some(task) => {
                    self.execute(task);
                    executed += 1 + self.run_pending();
                }
                None => break,
            }
        }
        executed
    }

    /// Process everything that arrives within `duration`.
    pub async fn run_for(&mut self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut executed = self.run_pending();
        loop {
            match timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(task)) => {
                    self.execute(task);
                    executed += 1 + self.run_pending();
                }
                Ok(None) | Err(_) => break,
            }
        }
        executed
    }

    fn execute(&mut self, task: DispatchedTask) {
        match task {
            DispatchedTask::Native(event) => self.adapter.handle_native_event(event),
            DispatchedTask::Worker(outcome) => self.adapter.handle_worker_outcome(outcome),
        }
    }

    /// Deterministic teardown: native callbacks are unregistered before the
    /// channel closes.
    pub fn shutdown(mut self) {
        info!("Shutting down script runtime");
        self.adapter.shutdown();
        self.receiver.close();
        let dropped = std::iter::from_fn(|| self.receiver.try_recv().ok()).count();
        if dropped > 0 {
            debug!("Dropped {} undelivered native tasks", dropped);
        }
    }
}
