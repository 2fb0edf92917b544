//! The SQL executor pool.
//!
//! A fixed pool of worker threads executes bulk fact queries so that
//! the cache manager thread never blocks on SQL. Jobs are closures; the
//! loader hands each one its completers and the generated statement.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::debug;

use lattice_common::error::{LatticeError, LatticeResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of SQL worker threads.
pub struct SqlExecutorPool {
    sender: Mutex<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SqlExecutorPool {
    /// Starts a pool with `size` worker threads.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let handles = (0..size.max(1))
            .map(|i| {
                let receiver = Arc::clone(&receiver);
                std::thread::Builder::new()
                    .name(format!("lattice-sql-{}", i))
                    .spawn(move || worker_loop(&receiver))
                    .expect("failed to spawn SQL worker thread")
            })
            .collect();
        Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
        }
    }

    /// Submits a job. Fails with `Shutdown` after the pool has stopped.
    pub fn submit<F: FnOnce() + Send + 'static>(&self, job: F) -> LatticeResult<()> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender
                .send(Box::new(job))
                .map_err(|_| LatticeError::Shutdown),
            None => Err(LatticeError::Shutdown),
        }
    }

    /// Stops accepting jobs, drains the queue, and joins the workers.
    /// Idempotent.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        drop(sender);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        debug!("SQL executor pool stopped");
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Job>>) {
    loop {
        let job = {
            let receiver = receiver.lock();
            receiver.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => return,
        }
    }
}

impl Drop for SqlExecutorPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
