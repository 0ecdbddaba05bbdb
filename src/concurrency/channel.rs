use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Shared<T> {
    queue: SegQueue<T>,
    lock: Mutex<()>,
    ready: Condvar,
    closed: AtomicBool,
}

/// Unbounded lock-free queue built on `SegQueue` with parked blocking receive.
///
/// Producers never wait on consumers. Once closed, pushes are dropped and blocking
/// receives return `None` as soon as the queue is drained.
#[derive(Debug)]
pub struct WaitQueue<T> {
    inner: Arc<Shared<T>>,
}

impl<T> Clone for WaitQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> WaitQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                queue: SegQueue::new(),
                lock: Mutex::new(()),
                ready: Condvar::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns `false` if the queue was already closed.
    pub fn push(&self, value: T) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inner.queue.push(value);
        let _guard = self.inner.lock.lock();
        self.inner.ready.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.queue.pop()
    }

    pub fn pop_blocking(&self) -> Option<T> {
        loop {
            if let Some(value) = self.try_pop() {
                return Some(value);
            }
            let mut guard = self.inner.lock.lock();
            if !self.inner.queue.is_empty() {
                continue;
            }
            if self.is_closed() {
                return self.try_pop();
            }
            self.inner.ready.wait(&mut guard);
        }
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(value) = self.try_pop() {
                return Some(value);
            }
            let mut guard = self.inner.lock.lock();
            if !self.inner.queue.is_empty() {
                continue;
            }
            if self.is_closed() {
                return self.try_pop();
            }
            if self
                .inner
                .ready
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                drop(guard);
                return self.try_pop();
            }
        }
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    /// Number of live handles sharing this queue.
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
