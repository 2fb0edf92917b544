//! Completion handles connecting the cache manager, the SQL pool, and
//! batch readers.
//!
//! A [`FutureResult`] is either already satisfied (a segment found in
//! cache) or backed by a one-shot slot completed later by a SQL pool
//! worker. Batch readers block on `wait`; the cache manager thread never
//! does.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{LatticeError, LatticeResult};

struct SlotState<T> {
    result: Option<LatticeResult<T>>,
    cancelled: bool,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    complete: Condvar,
}

enum Inner<T> {
    Ready(LatticeResult<T>),
    Pending(Arc<Slot<T>>),
}

/// A completion handle holding a value or an error, now or later.
///
/// Cloning produces another handle on the same completion, so one
/// in-flight load can satisfy several statements.
pub struct FutureResult<T: Clone> {
    inner: Inner<T>,
}

/// Producer side of a pending [`FutureResult`].
pub struct Completer<T: Clone> {
    slot: Arc<Slot<T>>,
}

impl<T: Clone> FutureResult<T> {
    /// Creates an already-satisfied handle.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self {
            inner: Inner::Ready(Ok(value)),
        }
    }

    /// Creates an already-failed handle.
    #[must_use]
    pub fn failed(error: LatticeError) -> Self {
        Self {
            inner: Inner::Ready(Err(error)),
        }
    }

    /// Creates a pending handle and the completer that will satisfy it.
    #[must_use]
    pub fn pending() -> (Self, Completer<T>) {
        let slot = Arc::new(Slot {
            state: Mutex::new(SlotState {
                result: None,
                cancelled: false,
            }),
            complete: Condvar::new(),
        });
        (
            Self {
                inner: Inner::Pending(Arc::clone(&slot)),
            },
            Completer { slot },
        )
    }

    /// Blocks until the result is available and returns a clone of it.
    pub fn wait(&self) -> LatticeResult<T> {
        match &self.inner {
            Inner::Ready(result) => result.clone(),
            Inner::Pending(slot) => {
                let mut state = slot.state.lock();
                loop {
                    if let Some(result) = &state.result {
                        return result.clone();
                    }
                    if state.cancelled {
                        return Err(LatticeError::Cancelled);
                    }
                    slot.complete.wait(&mut state);
                }
            }
        }
    }

    /// Blocks up to `timeout` for the result.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<LatticeResult<T>> {
        match &self.inner {
            Inner::Ready(result) => Some(result.clone()),
            Inner::Pending(slot) => {
                let mut state = slot.state.lock();
                if state.result.is_none() && !state.cancelled {
                    slot.complete.wait_for(&mut state, timeout);
                }
                if state.cancelled && state.result.is_none() {
                    return Some(Err(LatticeError::Cancelled));
                }
                state.result.clone()
            }
        }
    }

    /// Returns the result if it is already available.
    #[must_use]
    pub fn try_get(&self) -> Option<LatticeResult<T>> {
        match &self.inner {
            Inner::Ready(result) => Some(result.clone()),
            Inner::Pending(slot) => slot.state.lock().result.clone(),
        }
    }

    /// Returns whether the result is available without blocking.
    #[must_use]
    pub fn is_done(&self) -> bool {
        match &self.inner {
            Inner::Ready(_) => true,
            Inner::Pending(slot) => {
                let state = slot.state.lock();
                state.result.is_some() || state.cancelled
            }
        }
    }

    /// Requests cancellation. Waiters observe `Cancelled` unless a
    /// result had already been delivered; the producer can poll
    /// [`Completer::is_cancelled`] to stop early.
    pub fn cancel(&self) {
        if let Inner::Pending(slot) = &self.inner {
            let mut state = slot.state.lock();
            if state.result.is_none() {
                state.cancelled = true;
                slot.complete.notify_all();
            }
        }
    }
}

impl<T: Clone> Clone for FutureResult<T> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            Inner::Ready(result) => Inner::Ready(result.clone()),
            Inner::Pending(slot) => Inner::Pending(Arc::clone(slot)),
        };
        Self { inner }
    }
}

impl<T: Clone> Completer<T> {
    /// Delivers the result and wakes all waiters. Delivery after
    /// cancellation is allowed; waiters that have not yet observed the
    /// cancellation get the value.
    pub fn complete(&self, result: LatticeResult<T>) {
        let mut state = self.slot.state.lock();
        if state.result.is_none() {
            state.result = Some(result);
            self.slot.complete.notify_all();
        }
    }

    /// Returns whether a consumer has requested cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.slot.state.lock().cancelled
    }
}
