/// Side timer that preempts a running script
///
/// The timer thread sleeps on a channel for the script's budget. Stopping the
/// timer hangs up the channel and wakes the thread early; if the budget runs
/// out first the thread raises the runtime's interrupt flag.

use crate::sandbox::{InterruptHandle, SandboxError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug)]
pub struct TimeoutTimer {
    cancel: Option<mpsc::Sender<()>>,
    fired: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TimeoutTimer {
    /// Arm a timer that interrupts `handle` after `timeout`
    pub fn start(timeout: Duration, handle: InterruptHandle) -> Result<Self, SandboxError> {
        let (cancel, wakeup) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let thread = thread::Builder::new()
            .name("stepway-script-timer".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = wakeup.recv_timeout(timeout) {
                    flag.store(true, Ordering::SeqCst);
                    handle.interrupt();
                    tracing::warn!("⏱️ Script exceeded its {:?} budget, interrupting", timeout);
                }
            })
            .map_err(|e| SandboxError::Setup(format!("cannot spawn timeout timer: {e}")))?;

        Ok(Self {
            cancel: Some(cancel),
            fired,
            thread: Some(thread),
        })
    }

    /// Whether the budget has already run out
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Disarm the timer; returns whether it fired before being stopped
    pub fn stop(mut self) -> bool {
        self.disarm();
        self.fired()
    }

    fn disarm(&mut self) {
        // Dropping the sender disconnects the channel and wakes the thread
        self.cancel.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TimeoutTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
