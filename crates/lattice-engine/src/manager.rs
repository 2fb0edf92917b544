//! The segment cache manager: a single-threaded command executor.
//!
//! The segment index and the set of stars are mutated only from inside
//! this executor, so no locking protects them. Callers submit closures;
//! `execute` blocks on the result, `enqueue` fires and forgets.
//! Commands stay short and never wait on SQL - they hand work to the
//! SQL pool and return futures.

use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::debug;

use lattice_cache::SegmentIndex;
use lattice_common::error::{LatticeError, LatticeResult};
use lattice_segment::star::{Star, StarIdentity};

/// State owned by the manager thread.
#[derive(Default)]
pub struct ManagerState {
    /// The segment index.
    pub index: SegmentIndex,
    /// Stars known to the engine, for reconstructing segments from
    /// headers.
    pub stars: HashMap<StarIdentity, Arc<Star>>,
}

enum Command {
    Task(Box<dyn FnOnce(&mut ManagerState) + Send>),
    Shutdown,
}

/// Handle to the command executor thread.
pub struct SegmentCacheManager {
    sender: Mutex<Option<Sender<Command>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SegmentCacheManager {
    /// Starts the manager thread.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Command>();
        let handle = std::thread::Builder::new()
            .name("lattice-cache-manager".to_string())
            .spawn(move || {
                let mut state = ManagerState::default();
                while let Ok(command) = receiver.recv() {
                    match command {
                        Command::Task(task) => task(&mut state),
                        Command::Shutdown => break,
                    }
                }
                debug!("cache manager stopped");
            })
            .expect("failed to spawn cache manager thread");
        Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Runs a command on the manager thread and blocks on its result.
    pub fn execute<R, F>(&self, command: F) -> LatticeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut ManagerState) -> R + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.send(Command::Task(Box::new(move |state| {
            let _ = tx.send(command(state));
        })))?;
        rx.recv().map_err(|_| LatticeError::Shutdown)
    }

    /// Enqueues a command without waiting for it. Used by cache
    /// listeners and SQL pool workers folding results back in.
    pub fn enqueue<F>(&self, command: F) -> LatticeResult<()>
    where
        F: FnOnce(&mut ManagerState) + Send + 'static,
    {
        self.send(Command::Task(Box::new(command)))
    }

    fn send(&self, command: Command) -> LatticeResult<()> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender.send(command).map_err(|_| LatticeError::Shutdown),
            None => Err(LatticeError::Shutdown),
        }
    }

    /// Drains pending commands and stops the thread. Subsequent
    /// submissions fail with `Shutdown`. Idempotent.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if let Some(sender) = sender {
            let _ = sender.send(Command::Shutdown);
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for SegmentCacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SegmentCacheManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
