//! Recurring background tasks on dedicated threads.
//!
//! Used for per-cache expiry sweeps and periodic warming. Each task waits on
//! a channel with a timeout, so stopping it interrupts the wait immediately
//! instead of sleeping out the interval.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use crate::error::{CacheError, CacheResult};

/// Handle to a thread running a closure every `interval`.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn a thread that runs `task` after every `interval`.
    ///
    /// A panic inside one run is caught and logged; later runs still happen.
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, mut task: F) -> CacheResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_name = name.clone();

        let handle = thread::Builder::new()
            .name(format!("cache-{}", name))
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if panic::catch_unwind(AssertUnwindSafe(&mut task)).is_err() {
                            error!(task = %thread_name, "periodic task panicked, continuing");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!(task = %thread_name, "periodic task stopped");
                        break;
                    }
                }
            })
            .map_err(CacheError::Io)?;

        Ok(Self {
            name,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the task and wait for its thread to exit.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}
