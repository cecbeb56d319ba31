// SPDX-License-Identifier: GPL-3.0-only

//! Thread lifecycle management for frame producer loops
//!
//! Every capture family runs its producer on a dedicated OS thread so frame
//! pacing is independent of the async runtime. The controller owns the stop
//! signal and joins the thread on stop, which is what `stop_capture`'s
//! drain-before-return contract needs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one producer iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStep {
    /// Run the next iteration immediately
    Continue,
    /// Sleep before the next iteration (frame pacing, poll backoff)
    Idle(Duration),
    /// End the loop
    Stop,
}

/// Controller for a producer loop on its own thread
///
/// The loop function runs until it returns [`LoopStep::Stop`] or the
/// controller signals stop. Idle sleeps are chunked so a stop request is
/// honoured within roughly 100 ms even mid-sleep.
pub struct CaptureLoop {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    name: String,
}

impl CaptureLoop {
    /// Spawn a producer loop
    ///
    /// `init` runs once on the new thread; if it fails the thread exits
    /// without iterating and the error is logged.
    pub fn spawn<S, I, F>(name: &str, init: I, mut step: F) -> Self
    where
        S: Send + 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopStep + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let thread_name = name.to_string();

        let handle = thread::spawn(move || {
            let mut state = match init() {
                Ok(state) => state,
                Err(e) => {
                    warn!(name = %thread_name, error = %e, "Producer init failed");
                    return;
                }
            };
            debug!(name = %thread_name, "Producer loop running");

            while !stop_flag.load(Ordering::SeqCst) {
                match step(&mut state) {
                    LoopStep::Continue => {}
                    LoopStep::Idle(duration) => {
                        interruptible_sleep(duration, &stop_flag);
                    }
                    LoopStep::Stop => {
                        debug!(name = %thread_name, "Producer requested stop");
                        break;
                    }
                }
            }
            info!(name = %thread_name, "Producer loop exiting");
        });

        Self {
            handle: Some(handle),
            stop,
            name: name.to_string(),
        }
    }

    /// Stop signal handle for use inside blocking producer calls
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal stop without waiting
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Signal stop and wait for the thread to drain
    pub fn stop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(name = %self.name, "Producer thread panicked");
            }
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

/// Sleep in ≤100 ms slices so a stop request interrupts promptly
fn interruptible_sleep(total: Duration, stop: &AtomicBool) {
    let slice = Duration::from_millis(100);
    let mut remaining = total;
    while !remaining.is_zero() {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let step = remaining.min(slice);
        thread::sleep(step);
        remaining -= step;
    }
}
