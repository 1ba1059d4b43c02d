//! One-shot cancelable timers.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

type Handler = Box<dyn FnOnce() + Send + 'static>;

/// A timer entry with an absolute deadline.
///
/// Registered with a [`Reactor`](crate::socket::reactor::Reactor), which
/// calls [`handle`](TimeoutEvent::handle) once the deadline passes. The
/// handler runs at most once; after [`cancel`](TimeoutEvent::cancel) it never
/// runs.
pub struct TimeoutEvent {
    id: u64,
    deadline: Instant,
    handler: Mutex<Option<Handler>>,
    cancelled: AtomicBool,
    fired: AtomicBool,
}

impl TimeoutEvent {
    pub fn new(timeout: Duration, handler: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed),
            deadline: Instant::now() + timeout,
            handler: Mutex::new(Some(Box::new(handler))),
            cancelled: AtomicBool::new(false),
            fired: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn has_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Prevents the handler from running. Returns `false` if it already ran
    /// or was already cancelled.
    pub fn cancel(&self) -> bool {
        self.cancelled.store(true, Ordering::Release);
        // Dropping the handler releases whatever it captured.
        self.handler.lock().take().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether the handler has run. Set before the handler is invoked.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Runs the handler unless cancelled or already fired.
    pub fn handle(&self) {
        if self.is_cancelled() {
            return;
        }
        let handler = self.handler.lock().take();
        if let Some(handler) = handler {
            self.fired.store(true, Ordering::Release);
            handler();
        }
    }
}

impl fmt::Debug for TimeoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutEvent")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .field("cancelled", &self.is_cancelled())
            .field("fired", &self.has_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: &Arc<AtomicUsize>, timeout: Duration) -> Arc<TimeoutEvent> {
        let counter = Arc::clone(counter);
        TimeoutEvent::new(timeout, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fires_at_most_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = counting(&fired, Duration::ZERO);

        assert!(!timer.has_fired());
        timer.handle();
        timer.handle();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timer.has_fired());
        assert!(!timer.cancel());
    }

    #[test]
    fn test_cancelled_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = counting(&fired, Duration::ZERO);

        assert!(timer.cancel());
        timer.handle();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timer.is_cancelled());
        assert!(!timer.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = counting(&fired, Duration::from_millis(200));
        assert!(!timer.has_expired());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(timer.has_expired());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = TimeoutEvent::new(Duration::ZERO, || {});
        let b = TimeoutEvent::new(Duration::ZERO, || {});
        assert_ne!(a.id(), b.id());
    }
}
