//! Plain (non-TLS) TCP connection lifecycle.
//!
//! A [`PlainConnection`] owns one socket channel and walks it through
//! `INIT -> CONNECTING -> {CONNECTED, FAILED}`, with `CLOSED` reachable from
//! anywhere. Reactor readiness, timer expiry, exchange cancellation and
//! caller `close` all race to move the same connection; exactly one wins and
//! every observer sees the same first-recorded error.
//!
//! Per connect attempt:
//! 1. Arm the connect timer (once per connection, before resolution)
//! 2. Resolve the destination (once per connect sequence)
//! 3. Open a fresh socket, bind the local address, start the connect
//! 4. Register a [`ConnectEvent`] unless the connect finished immediately
//! 5. Wait for the attempt's result, or the exchange's cancellation
//!
//! A refused or OS-timed-out connect may be retried once.

use crate::base::context::IoResultExt;
use crate::base::neterror::{ConnectError, ConnectErrorKind, NetError};
use crate::client::Client;
use crate::dns::resolve_address;
use crate::socket::channel::{SocketChannel, TcpChannel};
use crate::socket::destination::{CacheKey, ConnectionIdentity, Destination};
use crate::socket::exchange::Exchange;
use crate::socket::pending::PendingResult;
use crate::socket::reactor::{AsyncEvent, Interest};
use crate::socket::retry::ConnectState;
use crate::socket::timer::TimeoutEvent;
use crate::socket::tube::SocketTube;
use parking_lot::ReentrantMutex;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::oneshot;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type AttemptResult = Result<ConnectState, AttemptFailure>;

/// A failed attempt, tagged with the path that resolved it.
struct AttemptFailure {
    kind: ConnectErrorKind,
    error: Arc<NetError>,
}

impl AttemptFailure {
    fn failed(error: Arc<NetError>) -> Self {
        Self { kind: ConnectErrorKind::Failed, error }
    }
}

/// Diagnostic view of a connection's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    Connecting,
    Connected,
    /// Closed after a failed connect.
    Failed,
    Closed,
}

pub struct PlainConnection {
    id: u64,
    identity: ConnectionIdentity,
    channel: Arc<dyn SocketChannel>,
    tube: SocketTube,
    client: Client,

    connecting: AtomicBool,
    connected: AtomicBool,
    closed: AtomicBool,
    // Guards `closed` transitions. Re-entrant: the pool may close the
    // connection from inside `connection_opened`.
    state_lock: ReentrantMutex<()>,
    error: OnceLock<Arc<NetError>>,
    connect_timer: OnceLock<Option<Arc<TimeoutEvent>>>,
    unsuccessful_attempts: AtomicUsize,
}

impl PlainConnection {
    pub fn new(client: Client, identity: ConnectionIdentity) -> Arc<Self> {
        Self::with_channel(client, identity, Arc::new(TcpChannel::new()))
    }

    /// Connection over a caller-supplied channel.
    pub fn with_channel(
        client: Client,
        identity: ConnectionIdentity,
        channel: Arc<dyn SocketChannel>,
    ) -> Arc<Self> {
        let connection = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            identity,
            tube: SocketTube::new(Arc::clone(&channel)),
            channel,
            client,
            connecting: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state_lock: ReentrantMutex::new(()),
            error: OnceLock::new(),
            connect_timer: OnceLock::new(),
            unsuccessful_attempts: AtomicUsize::new(0),
        });
        tracing::trace!(connection = %connection, "connection created");
        connection
    }

    /// Establishes the TCP connection on behalf of `exchange`.
    ///
    /// On failure the connection is closed and the returned error wraps the
    /// connection's first recorded error.
    pub async fn connect(self: &Arc<Self>, exchange: &Arc<Exchange>) -> Result<(), ConnectError> {
        debug_assert!(!self.is_connected(), "connect on a connected connection");
        if self.is_closed() {
            let cause = self.error().unwrap_or_else(|| Arc::new(NetError::ConnectionClosed));
            return Err(ConnectError::new(self.target().to_string(), cause));
        }
        self.connecting.store(true, Ordering::Release);
        tracing::debug!(connection = %self, exchange = exchange.id(), "connecting");

        let mut remote = None;
        let outcome = loop {
            let (pending, rx) = PendingResult::new();
            self.arm_connect_timer(exchange, &pending);

            let launch = self.launch(exchange, &pending, &mut remote);
            match self.await_attempt(exchange, &pending, rx, launch).await {
                Ok(ConnectState::Success) => break Ok(()),
                Ok(ConnectState::Retry) => {
                    debug_assert!(self.unsuccessful_attempts() <= 1);
                    tracing::debug!(connection = %self, "retrying connect");
                }
                Err(e) => break Err(e),
            }
        };
        self.cancel_connect_timer();

        match outcome {
            Ok(()) => {
                self.connected.store(true, Ordering::Release);
                tracing::debug!(connection = %self, "connected");
                Ok(())
            }
            Err(failure) => {
                let first = self.record_error(failure.error);
                tracing::debug!(connection = %self, error = %first, kind = ?failure.kind, "connect failed");
                self.close();
                Err(ConnectError::new(self.target().to_string(), first).with_kind(failure.kind))
            }
        }
    }

    /// Resolves if needed, then starts one attempt. Any failure completes
    /// `pending`.
    async fn launch(
        self: &Arc<Self>,
        exchange: &Arc<Exchange>,
        pending: &PendingResult<AttemptResult>,
        remote: &mut Option<SocketAddr>,
    ) {
        let addr = match *remote {
            Some(addr) => addr,
            None => {
                let target = self.target();
                let local = self.client.config().local_address;
                match resolve_address(self.client.resolver().as_ref(), target.host(), target.port(), local)
                    .await
                {
                    Ok(addr) => {
                        tracing::trace!(connection = %self, %addr, "destination resolved");
                        *remote = Some(addr);
                        addr
                    }
                    Err(e) => {
                        pending.complete(Err(AttemptFailure::failed(Arc::new(e))));
                        return;
                    }
                }
            }
        };
        self.start_attempt(exchange, pending, addr);
    }

    async fn await_attempt(
        &self,
        exchange: &Exchange,
        pending: &PendingResult<AttemptResult>,
        mut rx: oneshot::Receiver<AttemptResult>,
        launch: impl Future<Output = ()>,
    ) -> AttemptResult {
        let dropped =
            || -> AttemptResult { Err(AttemptFailure::failed(Arc::new(NetError::ConnectionClosed))) };
        tokio::pin!(launch);
        let mut launched = false;

        loop {
            tokio::select! {
                biased;
                result = &mut rx => return result.unwrap_or_else(|_| dropped()),
                cause = exchange.cancelled() => {
                    tracing::debug!(connection = %self, cause = %cause, "connect cancelled");
                    pending.complete(Err(AttemptFailure {
                        kind: self.cancellation_kind(),
                        error: Arc::new(cause),
                    }));
                    return (&mut rx).await.unwrap_or_else(|_| dropped());
                }
                () = &mut launch, if !launched => launched = true,
            }
        }
    }

    fn start_attempt(
        self: &Arc<Self>,
        exchange: &Arc<Exchange>,
        pending: &PendingResult<AttemptResult>,
        remote: SocketAddr,
    ) {
        match self.begin_connect(remote) {
            Ok(true) => {
                tracing::trace!(connection = %self, %remote, "connect finished immediately");
                pending.complete(self.opened_result());
            }
            Ok(false) => {
                let event = ConnectEvent {
                    connection: Arc::clone(self),
                    exchange: Arc::clone(exchange),
                    pending: pending.clone(),
                };
                self.client.reactor().register_event(Box::new(event));
            }
            Err(e) => {
                let first = self.record_error(Arc::new(e));
                pending.complete(Err(AttemptFailure::failed(first)));
                self.close();
            }
        }
    }

    fn begin_connect(&self, remote: SocketAddr) -> Result<bool, NetError> {
        let target = self.target();
        self.channel
            .open(remote, self.client.config())
            .connection_context(target.host(), target.port())?;
        if let Some(ip) = self.client.config().local_address {
            let local = SocketAddr::new(ip, 0);
            self.channel.bind(local).bind_context(local)?;
        }
        self.channel.connect(remote).connection_context(target.host(), target.port())
    }

    fn opened_result(self: &Arc<Self>) -> AttemptResult {
        if self.connection_opened() {
            Ok(ConnectState::Success)
        } else {
            Err(AttemptFailure::failed(Arc::new(NetError::ConnectionClosed)))
        }
    }

    /// Hands the connection to the pool. `false` if it was closed first, or
    /// by the pool.
    fn connection_opened(self: &Arc<Self>) -> bool {
        let _guard = self.state_lock.lock();
        if self.is_closed() {
            return false;
        }
        self.client.pool().connection_opened(self);
        !self.is_closed()
    }

    fn arm_connect_timer(self: &Arc<Self>, exchange: &Arc<Exchange>, pending: &PendingResult<AttemptResult>) {
        self.connect_timer.get_or_init(|| {
            let timeout = exchange.remaining_connect_timeout()?;
            let name = self.to_string();
            let exchange = Arc::clone(exchange);
            let pending = pending.clone();
            let executor = Arc::clone(self.client.executor());

            let timer = TimeoutEvent::new(timeout, move || {
                tracing::debug!(connection = %name, "HTTP connect timed out");
                exchange.cancel(NetError::ConnectionTimedOut);
                let failure = AttemptFailure {
                    kind: ConnectErrorKind::Timeout,
                    error: Arc::new(NetError::ConnectionTimedOut),
                };
                pending.complete_async(executor.as_ref(), Err(failure));
            });
            tracing::trace!(connection = %self, ?timeout, timer = timer.id(), "connect timer armed");
            self.client.reactor().register_timer(Arc::clone(&timer));
            Some(timer)
        });
    }

    /// Kind of a failure caused by exchange cancellation: a timeout if this
    /// connection's own timer cancelled it.
    fn cancellation_kind(&self) -> ConnectErrorKind {
        if self.connect_timer().is_some_and(|timer| timer.has_fired()) {
            ConnectErrorKind::Timeout
        } else {
            ConnectErrorKind::Cancelled
        }
    }

    fn cancel_connect_timer(&self) {
        if let Some(timer) = self.connect_timer() {
            if !timer.is_cancelled() {
                self.client.reactor().cancel_timer(timer);
            }
        }
    }

    /// Records `error` unless one was recorded before. Returns the error
    /// that is now on record.
    fn record_error(&self, error: Arc<NetError>) -> Arc<NetError> {
        Arc::clone(self.error.get_or_init(|| error))
    }

    /// Closes the connection. Idempotent.
    pub fn close(&self) {
        self.close_with(None);
    }

    /// Closes the connection, recording `cause` if no error is on record.
    /// Closing while a connect is in flight records `ConnectionClosed`.
    ///
    /// Only the first call has an effect: it cancels the connect timer,
    /// signals the tube, closes the socket and notifies the pool.
    pub fn close_with(&self, cause: Option<NetError>) {
        if self.is_closed() {
            return;
        }
        let _guard = self.state_lock.lock();
        if self.is_closed() {
            return;
        }
        self.closed.store(true, Ordering::Release);

        let connecting = self.connecting.load(Ordering::Acquire) && !self.is_connected();
        match cause {
            Some(cause) => {
                self.record_error(Arc::new(cause));
            }
            None if connecting => {
                self.record_error(Arc::new(NetError::ConnectionClosed));
            }
            None => {}
        }
        let first = self.error();
        match &first {
            Some(e) => tracing::debug!(connection = %self, error = %e, "closing connection"),
            None => tracing::debug!(connection = %self, "closing connection"),
        }

        self.cancel_connect_timer();
        self.tube.signal_closed(first);
        if let Err(e) = self.channel.close() {
            tracing::warn!(connection = %self, error = %e, "failed to close channel");
        }
        self.client.pool().connection_closed(self);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn destination(&self) -> &Destination {
        &self.identity.destination
    }

    /// The endpoint the socket connects to: the proxy, if any.
    pub fn target(&self) -> &Destination {
        self.identity.connect_target()
    }

    pub fn label(&self) -> Option<&str> {
        self.identity.label.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_secure(&self) -> bool {
        false
    }

    pub fn is_proxied(&self) -> bool {
        self.identity.proxy.is_some()
    }

    pub fn proxy_address(&self) -> Option<&Destination> {
        self.identity.proxy.as_ref()
    }

    pub fn cache_key(&self) -> CacheKey {
        self.identity.cache_key()
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            if !self.is_connected() && self.error.get().is_some() {
                ConnectionState::Failed
            } else {
                ConnectionState::Closed
            }
        } else if self.is_connected() {
            ConnectionState::Connected
        } else if self.connecting.load(Ordering::Acquire) {
            ConnectionState::Connecting
        } else {
            ConnectionState::Init
        }
    }

    /// The first error recorded on this connection.
    pub fn error(&self) -> Option<Arc<NetError>> {
        self.error.get().cloned()
    }

    pub fn unsuccessful_attempts(&self) -> usize {
        self.unsuccessful_attempts.load(Ordering::Acquire)
    }

    pub fn connect_timer(&self) -> Option<&Arc<TimeoutEvent>> {
        self.connect_timer.get().and_then(Option::as_ref)
    }

    /// The duplex flow for this connection's bytes.
    pub fn flow(&self) -> &SocketTube {
        &self.tube
    }

    pub fn channel(&self) -> &Arc<dyn SocketChannel> {
        &self.channel
    }
}

impl fmt::Display for PlainConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => write!(f, "PlainConnection(#{} {} -> {})", self.id, label, self.target()),
            None => write!(f, "PlainConnection(#{} -> {})", self.id, self.target()),
        }
    }
}

impl fmt::Debug for PlainConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainConnection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("error", &self.error.get())
            .field("unsuccessful_attempts", &self.unsuccessful_attempts())
            .finish()
    }
}

/// Reactor registration for one in-progress connect.
struct ConnectEvent {
    connection: Arc<PlainConnection>,
    exchange: Arc<Exchange>,
    pending: PendingResult<AttemptResult>,
}

impl ConnectEvent {
    fn complete(&self, result: AttemptResult) {
        self.pending.complete_async(self.connection.client.executor().as_ref(), result);
    }

    fn fail(&self, error: Arc<NetError>) {
        let first = self.connection.record_error(error);
        self.complete(Err(AttemptFailure::failed(first)));
        self.connection.close();
    }
}

impl AsyncEvent for ConnectEvent {
    fn channel(&self) -> Arc<dyn SocketChannel> {
        Arc::clone(&self.connection.channel)
    }

    fn interest(&self) -> Interest {
        Interest::Connect
    }

    fn handle(self: Box<Self>) {
        let conn = &self.connection;
        match conn.channel.finish_connect() {
            Ok(true) => {
                tracing::trace!(connection = %conn, "connect finished");
                self.complete(conn.opened_result());
            }
            Ok(false) => match self.exchange.cancel_cause() {
                Some(cause) => self.complete(Err(AttemptFailure {
                    kind: conn.cancellation_kind(),
                    error: Arc::new(cause),
                })),
                None => {
                    tracing::trace!(connection = %conn, "spurious connect readiness");
                    let reactor = Arc::clone(conn.client.reactor());
                    reactor.register_event(self);
                }
            },
            Err(e) => {
                let target = conn.target();
                let error = NetError::connection_failed_to(target.host(), target.port(), e);
                let retry = conn.client.retry_policy().can_retry(
                    &error,
                    conn.unsuccessful_attempts(),
                    conn.connect_timer().map(Arc::as_ref),
                );
                if retry {
                    conn.unsuccessful_attempts.fetch_add(1, Ordering::AcqRel);
                    tracing::debug!(connection = %conn, error = %error, "connect failed; will retry");
                    self.complete(Ok(ConnectState::Retry));
                } else {
                    self.fail(Arc::new(error));
                }
            }
        }
    }

    fn abort(self: Box<Self>, cause: NetError) {
        tracing::debug!(connection = %self.connection, cause = %cause, "connect aborted by reactor");
        self.fail(Arc::new(cause));
    }
}
