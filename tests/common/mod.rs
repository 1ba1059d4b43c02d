//! Deterministic collaborators shared by the integration suites.

#![allow(dead_code)]

use parking_lot::Mutex;
use plainnet::base::neterror::NetError;
use plainnet::dns::{Addrs, Name, Resolve, Resolving};
use plainnet::socket::channel::SocketChannel;
use plainnet::socket::config::ConnectConfig;
use plainnet::socket::connection::PlainConnection;
use plainnet::socket::pool::ConnectionPool;
use plainnet::socket::reactor::{AsyncEvent, Executor, Interest, Reactor, Task};
use plainnet::socket::retry::RetryPolicy;
use plainnet::socket::timer::TimeoutEvent;
use plainnet::{Client, ClientBuilder};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tokio::io::ReadBuf;

/// How a [`FakeChannel`] answers readiness polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Immediate,
    /// Pending until the channel is closed.
    Never,
}

/// Scripted socket channel.
///
/// `connect` and `finish_connect` pop scripted results; when the script runs
/// out they answer "in progress" and "connected" respectively.
#[derive(Debug)]
pub struct FakeChannel {
    readiness: Readiness,
    connect_script: Mutex<VecDeque<io::Result<bool>>>,
    finish_script: Mutex<VecDeque<io::Result<bool>>>,
    bind_error: Option<io::ErrorKind>,
    close_error: bool,
    closed: AtomicBool,
    parked: Mutex<Vec<Waker>>,
    pub opens: AtomicUsize,
    pub binds: AtomicUsize,
    pub connects: AtomicUsize,
    pub finishes: AtomicUsize,
    pub closes: AtomicUsize,
}

impl FakeChannel {
    pub fn new(readiness: Readiness) -> Self {
        Self {
            readiness,
            connect_script: Mutex::new(VecDeque::new()),
            finish_script: Mutex::new(VecDeque::new()),
            bind_error: None,
            close_error: false,
            closed: AtomicBool::new(false),
            parked: Mutex::new(Vec::new()),
            opens: AtomicUsize::new(0),
            binds: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            finishes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Channel whose connect completes synchronously.
    pub fn immediate() -> Self {
        Self::new(Readiness::Immediate).connect_with(vec![Ok(true)])
    }

    pub fn connect_with(self, script: Vec<io::Result<bool>>) -> Self {
        *self.connect_script.lock() = script.into();
        self
    }

    pub fn finish_with(self, script: Vec<io::Result<bool>>) -> Self {
        *self.finish_script.lock() = script.into();
        self
    }

    pub fn fail_bind(mut self, kind: io::ErrorKind) -> Self {
        self.bind_error = Some(kind);
        self
    }

    pub fn fail_close(mut self) -> Self {
        self.close_error = true;
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(io::Error::new(io::ErrorKind::NotConnected, "fake channel closed"))
        } else {
            Ok(())
        }
    }
}

pub fn refused() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused")
}

impl SocketChannel for FakeChannel {
    fn open(&self, _remote: SocketAddr, _config: &ConnectConfig) -> io::Result<()> {
        self.check_open()?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn bind(&self, _local: SocketAddr) -> io::Result<()> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        match self.bind_error {
            Some(kind) => Err(io::Error::new(kind, "bind refused by fake")),
            None => Ok(()),
        }
    }

    fn connect(&self, _remote: SocketAddr) -> io::Result<bool> {
        self.check_open()?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connect_script.lock().pop_front().unwrap_or(Ok(false))
    }

    fn finish_connect(&self) -> io::Result<bool> {
        self.check_open()?;
        self.finishes.fetch_add(1, Ordering::SeqCst);
        self.finish_script.lock().pop_front().unwrap_or(Ok(true))
    }

    fn poll_ready(&self, cx: &mut Context<'_>, _interest: Interest) -> Poll<io::Result<()>> {
        self.check_open()?;
        match self.readiness {
            Readiness::Immediate => Poll::Ready(Ok(())),
            Readiness::Never => {
                self.parked.lock().push(cx.waker().clone());
                // Re-check after parking so a concurrent close is not missed.
                self.check_open()?;
                Poll::Pending
            }
        }
    }

    fn poll_read(&self, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::Unsupported, "fake channel")))
    }

    fn poll_write(&self, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::Unsupported, "fake channel")))
    }

    fn shutdown_write(&self) -> io::Result<()> {
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        for waker in self.parked.lock().drain(..) {
            waker.wake();
        }
        if self.close_error {
            return Err(io::Error::new(io::ErrorKind::Other, "close failed"));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok("127.0.0.1:40000".parse().unwrap())
    }
}

/// Reactor that holds registrations until the test fires them.
#[derive(Default)]
pub struct HoldingReactor {
    events: Mutex<Vec<Box<dyn AsyncEvent>>>,
    timers: Mutex<Vec<Arc<TimeoutEvent>>>,
    pub registered_events: AtomicUsize,
    pub cancelled_timers: AtomicUsize,
}

impl HoldingReactor {
    pub fn pending_events(&self) -> usize {
        self.events.lock().len()
    }

    pub fn timers(&self) -> Vec<Arc<TimeoutEvent>> {
        self.timers.lock().clone()
    }

    /// Yields until at least `n` events are registered.
    pub async fn wait_for_events(&self, n: usize) {
        while self.pending_events() < n {
            tokio::task::yield_now().await;
        }
    }

    /// Dispatches every held event, as if all channels became ready.
    pub fn fire_events(&self) {
        let events = std::mem::take(&mut *self.events.lock());
        for event in events {
            event.handle();
        }
    }

    pub fn fire_timers(&self) {
        let timers = std::mem::take(&mut *self.timers.lock());
        for timer in timers {
            timer.handle();
        }
    }
}

impl Reactor for HoldingReactor {
    fn register_event(&self, event: Box<dyn AsyncEvent>) {
        self.registered_events.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push(event);
    }

    fn register_timer(&self, timer: Arc<TimeoutEvent>) {
        self.timers.lock().push(timer);
    }

    fn cancel_timer(&self, timer: &Arc<TimeoutEvent>) {
        timer.cancel();
        self.cancelled_timers.fetch_add(1, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        let events = std::mem::take(&mut *self.events.lock());
        for event in events {
            event.abort(NetError::ConnectionClosed);
        }
    }
}

/// Runs tasks on the calling thread.
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task()
    }
}

/// Pool that counts notifications and can close connections on open.
#[derive(Default)]
pub struct CountingPool {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    close_on_open: bool,
}

impl CountingPool {
    /// Pool that closes every connection it is told about.
    pub fn closing() -> Self {
        Self { close_on_open: true, ..Default::default() }
    }
}

impl ConnectionPool for CountingPool {
    fn connection_opened(&self, connection: &Arc<PlainConnection>) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.close_on_open {
            connection.close();
        }
    }

    fn connection_closed(&self, _connection: &PlainConnection) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Resolver answering every name with fixed addresses.
pub struct StaticResolver {
    addrs: Vec<SocketAddr>,
    pub calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self { addrs, calls: AtomicUsize::new(0) }
    }

    pub fn loopback() -> Self {
        Self::new(vec!["127.0.0.1:0".parse().unwrap()])
    }
}

impl Resolve for StaticResolver {
    fn resolve(&self, _name: Name) -> Resolving {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let addrs = self.addrs.clone();
        Box::pin(async move { Ok(Box::new(addrs.into_iter()) as Addrs) })
    }
}

/// Builder with deterministic config and the default retry policy.
pub fn builder() -> ClientBuilder {
    Client::builder().config(ConnectConfig::default()).retry_policy(RetryPolicy::default())
}

/// Client over a holding reactor, inline executor and counting pool.
pub fn held_client(
    reactor: &Arc<HoldingReactor>,
    pool: &Arc<CountingPool>,
    resolver: &Arc<StaticResolver>,
) -> Client {
    builder()
        .reactor(reactor.clone())
        .executor(Arc::new(InlineExecutor))
        .pool(pool.clone())
        .resolver(resolver.clone())
        .build()
        .unwrap()
}

pub const SHORT: Duration = Duration::from_millis(200);
