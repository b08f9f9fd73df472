//! Coalescing of synchronous request bursts

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Callback invoked once per tick with the number of coalesced extra calls
pub type DebounceCallback = Arc<dyn Fn(u32) -> BoxFuture<'static, ()> + Send + Sync>;

/// Collapses bursts of [`Debouncer::schedule`] calls into one spawned tick
///
/// The first call spawns a task that waits one scheduling yield (or the
/// requested back-off) before running the callback. Calls made before the
/// tick fires only bump the coalesced count.
pub struct Debouncer {
    state: Arc<Mutex<Option<u32>>>,
    callback: DebounceCallback,
}

impl Debouncer {
    /// Create a debouncer around `callback`
    #[must_use]
    pub fn new(callback: DebounceCallback) -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
            callback,
        }
    }

    /// Schedule a tick, or join the one already pending
    ///
    /// Returns `true` when a new tick was spawned. Must be called from within
    /// a Tokio runtime.
    pub fn schedule(&self, backoff: Option<Duration>) -> bool {
        {
            let mut state = self.state.lock();
            if let Some(count) = state.as_mut() {
                *count += 1;
                return false;
            }
            *state = Some(0);
        }

        let state = Arc::clone(&self.state);
        let callback = Arc::clone(&self.callback);
        tokio::spawn(async move {
            match backoff {
                Some(delay) if !delay.is_zero() => tokio::time::sleep(delay).await,
                _ => tokio::task::yield_now().await,
            }
            let count = state.lock().take().unwrap_or(0);
            trace!(coalesced = count, "debounce tick");
            callback(count).await;
        });
        true
    }

    /// True while a tick is pending
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.state.lock().is_some()
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("pending", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting() -> (Debouncer, Arc<Mutex<Vec<u32>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let debouncer = Debouncer::new(Arc::new(move |n: u32| {
            sink.lock().push(n);
            async {}.boxed()
        }));
        (debouncer, calls)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_becomes_one_tick() {
        let (debouncer, calls) = counting();
        assert!(debouncer.schedule(None));
        assert!(!debouncer.schedule(None));
        assert!(!debouncer.schedule(None));
        assert!(debouncer.is_scheduled());

        settle().await;
        assert_eq!(*calls.lock(), vec![2]);
        assert!(!debouncer.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_tick() {
        let (debouncer, calls) = counting();
        debouncer.schedule(Some(Duration::from_millis(50)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        debouncer.schedule(None);
        assert!(calls.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(*calls.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_after_tick_starts_new_one() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let debouncer = Debouncer::new(Arc::new(move |_: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}.boxed()
        }));
        debouncer.schedule(None);
        settle().await;
        debouncer.schedule(None);
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
