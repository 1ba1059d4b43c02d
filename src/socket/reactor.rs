//! Seams between a connection and the machinery that drives it.
//!
//! A [`Reactor`] multiplexes readiness of many channels plus one-shot timers
//! on a single dispatch context. An [`Executor`] runs caller-facing
//! completions off that context. Both are traits so tests can substitute
//! deterministic fakes; the crate ships [`SelectorManager`] and
//! [`TokioExecutor`].
//!
//! [`SelectorManager`]: crate::socket::selector::SelectorManager

use crate::base::neterror::NetError;
use crate::socket::channel::SocketChannel;
use crate::socket::timer::TimeoutEvent;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;

/// The readiness a registered event waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    /// The non-blocking connect can be finalized.
    Connect,
    Read,
    Write,
}

/// A one-shot registration with a reactor.
///
/// The reactor calls exactly one of [`handle`](AsyncEvent::handle) or
/// [`abort`](AsyncEvent::abort). An event that needs another readiness
/// notification re-registers itself from `handle`.
pub trait AsyncEvent: Send + 'static {
    /// The channel whose readiness this event waits on.
    fn channel(&self) -> Arc<dyn SocketChannel>;

    fn interest(&self) -> Interest;

    /// Invoked from the reactor's dispatch context once the channel is ready.
    fn handle(self: Box<Self>);

    /// Invoked instead of `handle` when the reactor shuts down with the
    /// event still outstanding.
    fn abort(self: Box<Self>, cause: NetError);
}

/// Event-multiplexing loop: readiness notifications and timers.
pub trait Reactor: Send + Sync {
    fn register_event(&self, event: Box<dyn AsyncEvent>);

    /// Arms `timer`; it fires at most once, at or after its deadline.
    fn register_timer(&self, timer: Arc<TimeoutEvent>);

    /// Removes `timer` if it has not fired yet.
    fn cancel_timer(&self, timer: &Arc<TimeoutEvent>);

    /// Stops dispatching. Outstanding events are aborted.
    fn shutdown(&self) {}
}

impl<R: Reactor + ?Sized> Reactor for Arc<R> {
    fn register_event(&self, event: Box<dyn AsyncEvent>) {
        (**self).register_event(event)
    }

    fn register_timer(&self, timer: Arc<TimeoutEvent>) {
        (**self).register_timer(timer)
    }

    fn cancel_timer(&self, timer: &Arc<TimeoutEvent>) {
        (**self).cancel_timer(timer)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }
}

/// A unit of work handed to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs completions off the reactor's dispatch context.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Executor backed by a tokio runtime handle.
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor on the runtime of the calling context, if there is one.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }
}

impl fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioExecutor").finish_non_exhaustive()
    }
}
