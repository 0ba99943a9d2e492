//! Per-credential fixed-window budget

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep_until, Instant};

use crate::errors::RemoteError;

use super::dispatcher::DispatchStats;

#[derive(Debug)]
struct Window {
    started_at: Instant,
    used: u32,
}

/// Counts a caller as waiting until it is admitted or gives up
struct WaitingGuard<'a>(&'a AtomicU64);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Admission state of one credential.
///
/// Callers first take one of `max_queue` queue slots, then line up on a fair
/// (FIFO) mutex. The caller holding the mutex sleeps until it can be admitted,
/// so waiting never spins and arrival order is preserved.
#[derive(Debug)]
pub(crate) struct Bucket {
    max_requests: u32,
    window: Duration,
    queue: Semaphore,
    admission: Mutex<Window>,
    blocked_until: StdMutex<Option<Instant>>,
    admitted: AtomicU64,
    throttled: AtomicU64,
    rate_limited: AtomicU64,
    waiting: AtomicU64,
}

impl Bucket {
    pub(crate) fn new(max_requests: u32, window: Duration, max_queue: usize) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            queue: Semaphore::new(max_queue.max(1)),
            admission: Mutex::new(Window {
                started_at: Instant::now(),
                used: 0,
            }),
            blocked_until: StdMutex::new(None),
            admitted: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            waiting: AtomicU64::new(0),
        }
    }

    /// Wait until one more request may be sent
    pub(crate) async fn acquire(&self) -> Result<(), RemoteError> {
        let _slot = self
            .queue
            .acquire()
            .await
            .map_err(|_| RemoteError::Unavailable("dispatcher closed".to_string()))?;

        let waiting = WaitingGuard::enter(&self.waiting);
        let mut window = self.admission.lock().await;
        let mut throttled = false;

        loop {
            let now = Instant::now();

            if let Some(until) = self.blocked_until() {
                if now < until {
                    sleep_until(until).await;
                    continue;
                }
            }

            if now.duration_since(window.started_at) >= self.window {
                window.started_at = now;
                window.used = 0;
            }

            if window.used < self.max_requests {
                window.used += 1;
                break;
            }

            if !throttled {
                throttled = true;
                self.throttled.fetch_add(1, Ordering::Relaxed);
            }
            sleep_until(window.started_at + self.window).await;
        }

        drop(waiting);
        self.admitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Hold back every request of this credential for `duration`
    pub(crate) fn block_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut blocked = self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if blocked.is_none_or(|current| current < until) {
            *blocked = Some(until);
        }
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    fn blocked_until(&self) -> Option<Instant> {
        *self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn stats(&self) -> DispatchStats {
        DispatchStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            waiting: self.waiting.load(Ordering::Relaxed),
        }
    }
}
