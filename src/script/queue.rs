use super::callback::ResultCallback;
use crate::domain::errors::BridgeError;
use crate::infrastructure::bluetooth::BluetoothAdapter;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Work item run on the script thread with the adapter borrowed mutably.
pub type LocalTask = Box<dyn FnOnce(&mut BluetoothAdapter)>;

/// Cooperative task queue of the script thread.
///
/// Cloning shares the queue, so script callbacks can capture a handle and
/// schedule further adapter calls instead of re-entering the adapter.
#[derive(Clone, Default)]
pub struct ScriptTaskQueue {
    tasks: Rc<RefCell<VecDeque<LocalTask>>>,
}

impl ScriptTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: impl FnOnce(&mut BluetoothAdapter) + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    pub fn pop(&self) -> Option<LocalTask> {
        self.tasks.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Resolve `callback` with `value` on a later turn of the queue.
    pub fn defer_success<T: 'static>(&self, callback: ResultCallback<T>, value: T) {
        self.push(move |_| callback.succeed(value));
    }

    /// Fail `callback` with `error` on a later turn of the queue.
    pub fn defer_error<T: 'static>(&self, callback: ResultCallback<T>, error: BridgeError) {
        self.push(move |_| callback.fail(error));
    }
}
