//! Registry of live interpreter threads.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::thread::ThreadState;

/// The threads whose stacks and retain lists are collector roots.
///
/// The lock is only held for pushes, removals and root tracing, none of
/// which reach a pause checkpoint.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: Mutex<Vec<Arc<ThreadState>>>,
}

impl ThreadRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a thread.
    pub fn push(&self, state: Arc<ThreadState>) {
        self.threads.lock().push(state);
    }

    /// Removes a thread. Unknown threads are ignored.
    pub fn remove(&self, state: &Arc<ThreadState>) {
        let mut threads = self.threads.lock();
        if let Some(position) = threads.iter().position(|entry| Arc::ptr_eq(entry, state)) {
            threads.swap_remove(position);
        }
    }

    /// Number of registered threads.
    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    /// True if no thread is registered.
    pub fn is_empty(&self) -> bool {
        self.threads.lock().is_empty()
    }

    /// Calls `visit` for every registered thread while holding the lock.
    pub fn for_each(&self, mut visit: impl FnMut(&ThreadState)) {
        for state in self.threads.lock().iter() {
            visit(state);
        }
    }
}
