//! The request-level context a connect runs on behalf of.

use crate::base::neterror::NetError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

static NEXT_EXCHANGE_ID: AtomicU64 = AtomicU64::new(1);

/// One logical request: carries the connect-timeout budget and a
/// cancellation signal shared by everything working on its behalf.
///
/// The budget is measured from creation, so time spent before `connect`
/// (queueing, resolution) counts against it.
#[derive(Debug)]
pub struct Exchange {
    id: u64,
    connect_timeout: Option<Duration>,
    started: Instant,
    cancel: watch::Sender<Option<NetError>>,
}

impl Exchange {
    pub fn new(connect_timeout: Option<Duration>) -> Arc<Self> {
        let (cancel, _) = watch::channel(None);
        Arc::new(Self {
            id: NEXT_EXCHANGE_ID.fetch_add(1, Ordering::Relaxed),
            connect_timeout,
            started: Instant::now(),
            cancel,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// What is left of the connect budget; zero once exhausted.
    pub fn remaining_connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.map(|t| t.saturating_sub(self.started.elapsed()))
    }

    /// Cancels the exchange. The first cause wins; returns `false` if the
    /// exchange was already cancelled.
    pub fn cancel(&self, cause: NetError) -> bool {
        let cancelled = self.cancel.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(cause);
            true
        });
        if cancelled {
            tracing::debug!(exchange = self.id, "exchange cancelled");
        }
        cancelled
    }

    /// Cancels the exchange on behalf of the caller.
    pub fn abort(&self) -> bool {
        self.cancel(NetError::Aborted)
    }

    pub fn request_cancelled(&self) -> bool {
        self.cancel.borrow().is_some()
    }

    pub fn cancel_cause(&self) -> Option<NetError> {
        self.cancel.borrow().clone()
    }

    /// Resolves with the cancellation cause once the exchange is cancelled.
    pub async fn cancelled(&self) -> NetError {
        let mut rx = self.cancel.subscribe();
        let cause = rx.wait_for(Option::is_some).await.ok().and_then(|cause| cause.clone());
        match cause {
            Some(cause) => cause,
            // The sender lives in `self`, so this is unreachable while
            // `self` is borrowed.
            None => std::future::pending().await,
        }
    }
}
