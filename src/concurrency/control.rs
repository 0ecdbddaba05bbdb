use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Default)]
struct Flags {
    paused: AtomicBool,
    halt_requested: AtomicBool,
    lock: Mutex<()>,
    signal: Condvar,
}

/// Pause, resume and halt requests shared between an engine and its controllers.
///
/// Requests are plain flag writes followed by a wake-up; the engine observes them at
/// cycle boundaries. A halt request is permanent.
#[derive(Clone, Default)]
pub struct ControlChannel {
    flags: Arc<Flags>,
}

impl ControlChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_pause(&self) {
        if !self.flags.paused.swap(true, Ordering::SeqCst) {
            debug!("pause requested");
        }
        self.notify();
    }

    pub fn request_resume(&self) {
        if self.flags.paused.swap(false, Ordering::SeqCst) {
            debug!("resume requested");
        }
        self.notify();
    }

    pub fn request_halt(&self) {
        if !self.flags.halt_requested.swap(true, Ordering::SeqCst) {
            debug!("halt requested");
        }
        self.notify();
    }

    pub fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::SeqCst)
    }

    pub fn is_halt_requested(&self) -> bool {
        self.flags.halt_requested.load(Ordering::SeqCst)
    }

    fn notify(&self) {
        let _guard = self.flags.lock.lock();
        self.flags.signal.notify_all();
    }

    /// Parks until the pause is lifted. Returns `false` if a halt ended the wait.
    pub(crate) fn wait_while_paused(&self) -> bool {
        let mut guard = self.flags.lock.lock();
        while self.is_paused() && !self.is_halt_requested() {
            self.flags.signal.wait(&mut guard);
        }
        !self.is_halt_requested()
    }

    /// Sleeps for `delay` unless a pause or halt request arrives first.
    pub(crate) fn pace(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let deadline = Instant::now() + delay;
        let mut guard = self.flags.lock.lock();
        while !self.is_paused() && !self.is_halt_requested() {
            if self
                .flags
                .signal
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                break;
            }
        }
    }
}

impl fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlChannel")
            .field("paused", &self.is_paused())
            .field("halt_requested", &self.is_halt_requested())
            .finish_non_exhaustive()
    }
}
