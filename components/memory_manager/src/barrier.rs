//! Stop-the-world pause barrier.
//!
//! Every interpreter thread registers with the barrier. A collector requests
//! a pause, waits until every registered thread is parked, runs alone, then
//! releases everyone at once. Threads park themselves at checkpoints: every
//! allocation and every statement boundary.
//!
//! Threads about to block outside the heap (joins, sleeps, I/O) call
//! [`PauseBarrier::allow`], which counts them as parked until they call
//! [`PauseBarrier::disallow`].
//!
//! Registration is tracked per OS thread as well, so a collection requested
//! by a thread that never registered still waits for every registered one.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

static NEXT_BARRIER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Barriers the calling OS thread registered with
    static MEMBERSHIPS: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Default)]
struct BarrierState {
    /// Threads taking part in the pause protocol
    registered: usize,
    /// Threads currently parked, the collector included
    paused: usize,
    /// A collector is waiting for or running a collection
    pause_requested: bool,
}

/// Park-all / wait-for-all / release-all phaser used by the collector.
///
/// # Examples
///
/// ```
/// use memory_manager::PauseBarrier;
///
/// let barrier = PauseBarrier::new();
/// barrier.register();
/// {
///     // The only registered thread may collect right away.
///     let _collection = barrier.begin_collection();
///     assert!(barrier.pause_requested());
/// }
/// assert!(!barrier.pause_requested());
/// barrier.deregister();
/// ```
#[derive(Debug)]
pub struct PauseBarrier {
    id: u64,
    state: Mutex<BarrierState>,
    /// Signalled whenever a thread parks or leaves
    acknowledged: Condvar,
    /// Broadcast when a collection ends
    resumed: Condvar,
    /// Lock-free copy of `pause_requested` for the checkpoint fast path
    requested: AtomicBool,
}

impl Default for PauseBarrier {
    fn default() -> Self {
        Self {
            id: NEXT_BARRIER.fetch_add(1, Ordering::Relaxed),
            state: Mutex::default(),
            acknowledged: Condvar::new(),
            resumed: Condvar::new(),
            requested: AtomicBool::new(false),
        }
    }
}

impl PauseBarrier {
    /// Creates a barrier with no registered threads.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the calling thread to the protocol. Waits for a running
    /// collection to finish first, so a new thread never observes a heap
    /// being moved.
    pub fn register(&self) {
        let mut state = self.state.lock();
        while state.pause_requested {
            self.resumed.wait(&mut state);
        }
        state.registered += 1;
        MEMBERSHIPS.with(|memberships| memberships.borrow_mut().push(self.id));
        tracing::trace!(registered = state.registered, "thread registered");
    }

    /// Removes the calling thread from the protocol. The thread must not be
    /// inside an [`allow`](Self::allow) section.
    pub fn deregister(&self) {
        MEMBERSHIPS.with(|memberships| {
            let mut memberships = memberships.borrow_mut();
            if let Some(position) = memberships.iter().position(|id| *id == self.id) {
                memberships.swap_remove(position);
            }
        });
        let mut state = self.state.lock();
        state.registered = state.registered.saturating_sub(1);
        tracing::trace!(registered = state.registered, "thread deregistered");
        self.acknowledged.notify_all();
    }

    /// Number of registered threads.
    pub fn registered(&self) -> usize {
        self.state.lock().registered
    }

    /// True while a collector waits for or runs a collection.
    #[inline]
    pub fn pause_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Parks the calling thread if a pause was requested.
    #[inline]
    pub fn checkpoint(&self) {
        if self.pause_requested() {
            self.pause();
        }
    }

    /// True if the calling OS thread is registered with this barrier.
    pub fn is_registered_here(&self) -> bool {
        MEMBERSHIPS.with(|memberships| memberships.borrow().contains(&self.id))
    }

    /// Parks the calling thread until the current collection ends.
    /// Returns immediately if no pause is requested. Only registered
    /// threads count as parked.
    pub fn pause(&self) {
        let counted = self.is_registered_here();
        let mut state = self.state.lock();
        if !state.pause_requested {
            return;
        }
        if counted {
            state.paused += 1;
            self.acknowledged.notify_all();
        }
        while state.pause_requested {
            self.resumed.wait(&mut state);
        }
        if counted {
            state.paused -= 1;
        }
    }

    /// Declares that the calling thread will not touch the heap until
    /// [`disallow`](Self::disallow). A collector does not wait for it.
    pub fn allow(&self) {
        let mut state = self.state.lock();
        state.paused += 1;
        self.acknowledged.notify_all();
    }

    /// Ends an [`allow`](Self::allow) section, waiting for a running
    /// collection to finish first.
    pub fn disallow(&self) {
        let mut state = self.state.lock();
        while state.pause_requested {
            self.resumed.wait(&mut state);
        }
        state.paused = state.paused.saturating_sub(1);
    }

    /// Requests a pause and waits until every other registered thread is
    /// parked. The calling thread counts as parked if it is registered. The
    /// pause lasts until the returned guard is dropped.
    ///
    /// Callers must serialize collections among themselves; the heap does
    /// so with its collection lock.
    pub fn begin_collection(&self) -> CollectionGuard<'_> {
        let counted = self.is_registered_here();
        let mut state = self.state.lock();
        state.pause_requested = true;
        self.requested.store(true, Ordering::Release);
        if counted {
            state.paused += 1;
        }
        while state.paused < state.registered {
            self.acknowledged.wait(&mut state);
        }
        CollectionGuard {
            barrier: self,
            counted,
        }
    }

    fn end_collection(&self, counted: bool) {
        let mut state = self.state.lock();
        if counted {
            state.paused -= 1;
        }
        state.pause_requested = false;
        self.requested.store(false, Ordering::Release);
        self.resumed.notify_all();
    }
}

/// Keeps every registered thread parked while alive.
#[derive(Debug)]
#[must_use = "the pause ends when the guard is dropped"]
pub struct CollectionGuard<'a> {
    barrier: &'a PauseBarrier,
    counted: bool,
}

impl Drop for CollectionGuard<'_> {
    fn drop(&mut self) {
        self.barrier.end_collection(self.counted);
    }
}
