//! Single-flight update lock
//!
//! A FIFO async mutex that also counts holders and waiters, so callers can
//! wait until every queued task has finished rather than merely started.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard, Notify};

/// Mutual-exclusion lock for pipeline passes and configuration tasks
#[derive(Debug, Default)]
pub struct UpdateMutex {
    inner: Mutex<()>,
    outstanding: AtomicUsize,
    cleared: Notify,
}

/// Held lock; releases and updates the outstanding count on drop
#[derive(Debug)]
pub struct UpdateGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    _ticket: Ticket<'a>,
}

#[derive(Debug)]
struct Ticket<'a> {
    owner: &'a UpdateMutex,
}

impl<'a> Ticket<'a> {
    fn issue(owner: &'a UpdateMutex) -> Self {
        owner.outstanding.fetch_add(1, Ordering::SeqCst);
        Self { owner }
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if self.owner.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.owner.cleared.notify_waiters();
        }
    }
}

impl UpdateMutex {
    /// Create an unlocked mutex
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock
    ///
    /// Waiters are served in arrival order. A waiter counts as outstanding
    /// from the moment this is called.
    pub async fn acquire(&self) -> UpdateGuard<'_> {
        let ticket = Ticket::issue(self);
        let guard = self.inner.lock().await;
        UpdateGuard {
            _guard: guard,
            _ticket: ticket,
        }
    }

    /// Take the lock if nobody holds or waits for it
    #[must_use]
    pub fn try_acquire(&self) -> Option<UpdateGuard<'_>> {
        let ticket = Ticket::issue(self);
        let guard = self.inner.try_lock().ok()?;
        Some(UpdateGuard {
            _guard: guard,
            _ticket: ticket,
        })
    }

    /// Resolve once no task holds or waits for the lock
    pub async fn wait_for_clear_queue(&self) {
        loop {
            let cleared = self.cleared.notified();
            if self.is_idle() {
                return;
            }
            cleared.await;
        }
    }

    /// True when no task holds or waits for the lock
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) == 0
    }

    /// Number of tasks holding or waiting for the lock
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_is_exclusive() {
        let lock = UpdateMutex::new();
        let guard = lock.acquire().await;
        assert!(lock.try_acquire().is_none());
        assert_eq!(lock.outstanding(), 1);
        drop(guard);
        assert!(lock.is_idle());
        assert!(lock.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_queue_waits_for_all_waiters() {
        let lock = Arc::new(UpdateMutex::new());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
                order.lock().push(i);
            }));
            tokio::task::yield_now().await;
        }

        assert!(!lock.is_idle());
        lock.wait_for_clear_queue().await;
        assert!(lock.is_idle());
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn clear_queue_returns_immediately_when_idle() {
        let lock = UpdateMutex::new();
        lock.wait_for_clear_queue().await;
    }
}
