//! Production reactor.
//!
//! A single dispatch task owns every outstanding registration. Readiness is
//! awaited through tokio's I/O driver, timers through tokio's clock, and
//! handlers run one at a time on the dispatch task. Registration is a
//! non-blocking send, so handlers may re-register from inside the loop.

use crate::base::neterror::NetError;
use crate::socket::reactor::{AsyncEvent, Reactor};
use crate::socket::timer::TimeoutEvent;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

enum Command {
    Event(Box<dyn AsyncEvent>),
    Timer(Arc<TimeoutEvent>),
    CancelTimer(u64),
    Stop,
}

enum Fired {
    Event(u64),
    Timer(u64),
}

/// Reactor driven by a dedicated tokio task.
pub struct SelectorManager {
    commands: mpsc::UnboundedSender<Command>,
    stopped: Arc<AtomicBool>,
}

impl SelectorManager {
    /// Spawns the dispatch task on `handle`.
    pub fn spawn(handle: &Handle) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));
        handle.spawn(dispatch(rx, Arc::clone(&stopped)));
        Self { commands, stopped }
    }

    /// Stops the dispatch task. Outstanding and later registrations are
    /// aborted with `ConnectionClosed`.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("stopping selector");
            let _ = self.commands.send(Command::Stop);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Reactor for SelectorManager {
    fn register_event(&self, event: Box<dyn AsyncEvent>) {
        if self.is_stopped() {
            event.abort(NetError::ConnectionClosed);
            return;
        }
        if let Err(mpsc::error::SendError(Command::Event(event))) =
            self.commands.send(Command::Event(event))
        {
            event.abort(NetError::ConnectionClosed);
        }
    }

    fn register_timer(&self, timer: Arc<TimeoutEvent>) {
        if self.is_stopped() {
            tracing::debug!(timer = timer.id(), "selector stopped; timer not armed");
            return;
        }
        let _ = self.commands.send(Command::Timer(timer));
    }

    fn cancel_timer(&self, timer: &Arc<TimeoutEvent>) {
        timer.cancel();
        let _ = self.commands.send(Command::CancelTimer(timer.id()));
    }

    fn shutdown(&self) {
        self.stop();
    }
}

impl Drop for SelectorManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for SelectorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorManager").field("stopped", &self.is_stopped()).finish()
    }
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<Command>, stopped: Arc<AtomicBool>) {
    let mut waiting: FuturesUnordered<BoxFuture<'static, Fired>> = FuturesUnordered::new();
    let mut events: HashMap<u64, Box<dyn AsyncEvent>> = HashMap::new();
    let mut timers: HashMap<u64, Arc<TimeoutEvent>> = HashMap::new();
    let mut next_key = 0u64;

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Event(event)) => {
                    next_key += 1;
                    let key = next_key;
                    let channel = event.channel();
                    let interest = event.interest();
                    events.insert(key, event);
                    waiting.push(Box::pin(async move {
                        // Errors surface through the event's own handling.
                        let _ = poll_fn(|cx| channel.poll_ready(cx, interest)).await;
                        Fired::Event(key)
                    }));
                }
                Some(Command::Timer(timer)) => {
                    let id = timer.id();
                    let deadline = timer.deadline();
                    timers.insert(id, timer);
                    waiting.push(Box::pin(async move {
                        tokio::time::sleep_until(deadline).await;
                        Fired::Timer(id)
                    }));
                }
                Some(Command::CancelTimer(id)) => {
                    timers.remove(&id);
                }
                Some(Command::Stop) | None => break,
            },
            Some(fired) = waiting.next(), if !waiting.is_empty() => match fired {
                Fired::Event(key) => {
                    if let Some(event) = events.remove(&key) {
                        event.handle();
                    }
                }
                Fired::Timer(id) => {
                    if let Some(timer) = timers.remove(&id) {
                        tracing::trace!(timer = id, "timer fired");
                        timer.handle();
                    }
                }
            },
        }
    }

    stopped.store(true, Ordering::SeqCst);
    rx.close();
    let mut aborted = 0usize;
    for (_, event) in events.drain() {
        event.abort(NetError::ConnectionClosed);
        aborted += 1;
    }
    while let Ok(command) = rx.try_recv() {
        if let Command::Event(event) = command {
            event.abort(NetError::ConnectionClosed);
            aborted += 1;
        }
    }
    tracing::debug!(aborted, dropped_timers = timers.len(), "selector stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::channel::{SocketChannel, TcpChannel};
    use crate::socket::reactor::Interest;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct Probe {
        channel: Arc<dyn SocketChannel>,
        done: oneshot::Sender<Result<(), NetError>>,
    }

    impl AsyncEvent for Probe {
        fn channel(&self) -> Arc<dyn SocketChannel> {
            Arc::clone(&self.channel)
        }

        fn interest(&self) -> Interest {
            Interest::Read
        }

        fn handle(self: Box<Self>) {
            let _ = self.done.send(Ok(()));
        }

        fn abort(self: Box<Self>, cause: NetError) {
            let _ = self.done.send(Err(cause));
        }
    }

    fn probe() -> (Box<Probe>, oneshot::Receiver<Result<(), NetError>>) {
        let (done, rx) = oneshot::channel();
        (Box::new(Probe { channel: Arc::new(TcpChannel::new()), done }), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires() {
        let selector = SelectorManager::spawn(&Handle::current());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        selector.register_timer(TimeoutEvent::new(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_does_not_fire() {
        let selector = SelectorManager::spawn(&Handle::current());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let timer = TimeoutEvent::new(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        selector.register_timer(Arc::clone(&timer));
        selector.cancel_timer(&timer);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_not_ready_channel_is_handled_with_error() {
        // Readiness on an unconnected channel resolves with an error; the
        // event is still dispatched so it can observe the failure itself.
        let selector = SelectorManager::spawn(&Handle::current());
        let (event, rx) = probe();
        selector.register_event(event);
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_stop_aborts_late_registrations() {
        let selector = SelectorManager::spawn(&Handle::current());
        selector.stop();
        assert!(selector.is_stopped());

        let (event, rx) = probe();
        selector.register_event(event);
        assert_eq!(rx.await.unwrap().unwrap_err(), NetError::ConnectionClosed);
    }
}
