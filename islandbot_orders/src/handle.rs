// Background loop threads with a cooperative stop flag.
//
// The execution worker and the restore supervisor each run a step function
// on a named thread until `LoopHandle::stop` clears the flag. A step must
// return within a bounded time (both use timed waits) so that `stop` never
// hangs on an idle loop. An in-flight console operation is never interrupted;
// `stop` waits for it.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{debug, error};

/// Handle to a running background loop.
pub struct LoopHandle {
    name: String,
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl LoopHandle {
    /// Run `step` repeatedly on a new thread called `name`.
    pub(crate) fn spawn<F>(name: &str, mut step: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let keep_running = Arc::new(AtomicBool::new(true));
        let flag = keep_running.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    step();
                }
            })?;
        debug!(name, "loop started");
        Ok(Self {
            name: name.to_string(),
            keep_running,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the loop to stop and wait for the current step to finish.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(Err(_)) = self.thread.take().map(thread::JoinHandle::join) {
            error!(name = %self.name, "loop thread panicked");
        }
        debug!(name = %self.name, "loop stopped");
    }
}
