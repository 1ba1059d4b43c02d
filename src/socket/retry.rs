//! Connect retry policy.
//!
//! A plain connect is retried at most once, and only for failures that are
//! plausibly spurious (the peer refused, or the OS-level handshake timed
//! out). There is no backoff: the retry is issued as soon as the failure is
//! observed.

use crate::base::neterror::NetError;
use crate::socket::timer::TimeoutEvent;

/// Environment variable that disables the connect retry when set to `true`.
pub const DISABLE_RETRY_CONNECT_ENV: &str = "PLAINNET_DISABLE_RETRY_CONNECT";

/// Outcome of one connect attempt that did not fail fatally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Success,
    /// The attempt failed but another one may be issued.
    Retry,
}

/// Decides whether a failed connect attempt is retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    enabled: bool,
    classifier: fn(&NetError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { enabled: true, classifier: NetError::is_connect_failure }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self { enabled: false, ..Default::default() }
    }

    /// Default policy, disabled if `PLAINNET_DISABLE_RETRY_CONNECT=true`.
    pub fn from_env() -> Self {
        let disabled = std::env::var(DISABLE_RETRY_CONNECT_ENV)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if disabled {
            tracing::debug!("connect retry disabled via {}", DISABLE_RETRY_CONNECT_ENV);
            Self::disabled()
        } else {
            Self::default()
        }
    }

    /// Replaces the predicate selecting retry-eligible errors.
    pub fn with_classifier(mut self, classifier: fn(&NetError) -> bool) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `error` is in the retry-eligible class, ignoring attempt
    /// history.
    pub fn is_retryable(&self, error: &NetError) -> bool {
        self.enabled && (self.classifier)(error)
    }

    /// Whether a connect that failed with `error` gets one more attempt.
    ///
    /// Requires no earlier unsuccessful attempt and, if a connect timer is
    /// armed, that its deadline has not passed.
    pub fn can_retry(
        &self,
        error: &NetError,
        unsuccessful_attempts: usize,
        timer: Option<&TimeoutEvent>,
    ) -> bool {
        self.is_retryable(error)
            && unsuccessful_attempts == 0
            && !timer.is_some_and(TimeoutEvent::has_expired)
    }
}
