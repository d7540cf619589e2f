//! Reply timer shared by the negotiation machines
//!
//! Each machine owns one [`ReplyTimer`]. Arming schedules a tokio task that
//! sleeps for the reply timeout and then invokes the expiry callback with the
//! generation it was armed under. Every arm and stop bumps the generation, so
//! a machine checks [`ReplyTimer::is_current`] under its own lock before
//! acting on an expiry; anything armed before the last stop is discarded.
//!
//! ```text
//!  arm(gen=4) ──sleep──▶ expiry(4) ──▶ machine.lock() ──▶ is_current(4)? ──▶ handle timeout
//!        │                                                   │
//!        └── stop() bumps gen to 5 ─────────────────────────▶ false: stale, ignored
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Cancellable one-shot reply timer with a generation counter
#[derive(Debug)]
pub struct ReplyTimer {
    name: &'static str,
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReplyTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            generation: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Arm (or re-arm) the timer
    ///
    /// Returns the generation the expiry will carry. Without a tokio runtime
    /// the timer cannot be scheduled; the generation still advances so earlier
    /// expiries are invalidated.
    pub fn arm<F, Fut>(&self, duration: Duration, on_expiry: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("{} reply timer not armed: no tokio runtime", self.name);
                return generation;
            }
        };

        let name = self.name;
        let runtime = handle.clone();
        *task = Some(handle.spawn(async move {
            tokio::time::sleep(duration).await;
            trace!("{} reply timer expired (generation {})", name, generation);
            // Detached so the handler may stop this timer without aborting itself
            runtime.spawn(on_expiry(generation));
        }));
        trace!("{} reply timer armed for {:?} (generation {})", self.name, duration, generation);
        generation
    }

    /// Stop the timer and invalidate any expiry already in flight
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Whether an expiry carrying `generation` still matches the timer
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Armed and not yet expired
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for ReplyTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_timer_fires_with_generation() {
        let timer = ReplyTimer::new("test");
        let fired = Arc::new(AtomicU64::new(0));
        let seen = fired.clone();
        let generation = timer.arm(Duration::from_millis(10), move |generation| async move {
            seen.store(generation, Ordering::SeqCst);
        });
        assert!(timer.is_running());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), generation);
        assert!(timer.is_current(generation));
        assert!(!timer.is_running());
    }

    #[tokio::test]
    async fn test_stop_cancels_expiry() {
        let timer = ReplyTimer::new("test");
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let generation = timer.arm(Duration::from_millis(10), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.stop();
        assert!(!timer.is_current(generation));
        assert!(!timer.is_running());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rearm_invalidates_previous_generation() {
        let timer = ReplyTimer::new("test");
        let first = timer.arm(Duration::from_secs(5), |_| async {});
        let second = timer.arm(Duration::from_secs(5), |_| async {});
        assert!(!timer.is_current(first));
        assert!(timer.is_current(second));
        timer.stop();
    }

    #[test]
    fn test_arm_without_runtime() {
        let timer = ReplyTimer::new("test");
        let generation = timer.arm(Duration::from_millis(1), |_| async {});
        assert!(timer.is_current(generation));
        assert!(!timer.is_running());
    }
}
