//! Write-once completion handle.

use crate::socket::reactor::Executor;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// The result slot of one connect attempt.
///
/// Several racing paths (reactor readiness, timer expiry, cancellation,
/// synchronous failure) hold clones; the first to complete wins and every
/// later completion is a no-op.
pub struct PendingResult<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> PendingResult<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { slot: Arc::new(Mutex::new(Some(tx))) }, rx)
    }

    /// Completes with `value`. Returns `false` if already completed.
    pub fn complete(&self, value: T) -> bool {
        match self.slot.lock().take() {
            Some(tx) => {
                // A dropped receiver means the waiter gave up; the slot is
                // still consumed.
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl<T: Send + 'static> PendingResult<T> {
    /// Completes with `value` from a task on `executor`.
    pub fn complete_async(&self, executor: &dyn Executor, value: T) {
        let this = self.clone();
        executor.execute(Box::new(move || {
            this.complete(value);
        }));
    }
}

impl<T> Clone for PendingResult<T> {
    fn clone(&self) -> Self {
        Self { slot: Arc::clone(&self.slot) }
    }
}

impl<T> fmt::Debug for PendingResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResult").field("done", &self.is_done()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::reactor::Task;

    struct Inline;

    impl Executor for Inline {
        fn execute(&self, task: Task) {
            task()
        }
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let (pending, rx) = PendingResult::new();
        let other = pending.clone();

        assert!(pending.complete(1));
        assert!(!other.complete(2));
        assert!(other.is_done());
        assert_eq!(rx.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_complete_async() {
        let (pending, rx) = PendingResult::new();
        pending.complete_async(&Inline, "done");
        assert_eq!(rx.await.unwrap(), "done");
    }

    #[test]
    fn test_complete_after_receiver_dropped() {
        let (pending, rx) = PendingResult::<u8>::new();
        drop(rx);
        assert!(pending.complete(7));
        assert!(!pending.complete(8));
    }
}
