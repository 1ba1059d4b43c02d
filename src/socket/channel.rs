//! Raw non-blocking socket channel.
//!
//! [`SocketChannel`] is the seam between a connection and its OS socket.
//! [`TcpChannel`] builds the socket with `socket2` (so it can be tuned and
//! bound before connecting), issues a non-blocking connect, then hands the
//! descriptor to tokio's I/O driver for readiness.

use crate::socket::config::ConnectConfig;
use crate::socket::reactor::Interest;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::task::{ready, Context, Poll, Waker};
use tokio::io::ReadBuf;
use tokio::net::TcpStream;

/// A socket that can be connected without blocking.
///
/// All methods take `&self`: a channel is shared between its connection,
/// the reactor registration and the tube.
pub trait SocketChannel: Send + Sync + fmt::Debug {
    /// Creates a fresh socket suitable for `remote`, replacing any previous
    /// one.
    fn open(&self, remote: SocketAddr, config: &ConnectConfig) -> io::Result<()>;

    fn bind(&self, local: SocketAddr) -> io::Result<()>;

    /// Starts connecting. `Ok(true)` if the connect completed immediately,
    /// `Ok(false)` if it is in progress.
    fn connect(&self, remote: SocketAddr) -> io::Result<bool>;

    /// Finalizes an in-progress connect. `Ok(false)` on spurious readiness.
    fn finish_connect(&self) -> io::Result<bool>;

    /// Waits for `interest`. Resolves with an error once the channel closes.
    fn poll_ready(&self, cx: &mut Context<'_>, interest: Interest) -> Poll<io::Result<()>>;

    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>>;

    fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>>;

    fn shutdown_write(&self) -> io::Result<()>;

    /// Releases the socket. Later operations fail with `NotConnected`.
    fn close(&self) -> io::Result<()>;

    fn is_open(&self) -> bool;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

enum State {
    Idle,
    Open { socket: Socket, nodelay: bool },
    Registered(TcpStream),
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Open { .. } => "open",
            State::Registered(_) => "registered",
            State::Closed => "closed",
        }
    }
}

const READ_SIDE: usize = 0;
const WRITE_SIDE: usize = 1;

/// TCP implementation of [`SocketChannel`].
pub struct TcpChannel {
    state: Mutex<State>,
    // Tasks parked in readiness polls; woken by `close`.
    wakers: Mutex<[Option<Waker>; 2]>,
}

impl Default for TcpChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpChannel {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::Idle), wakers: Mutex::new([None, None]) }
    }

    fn park(&self, side: usize, cx: &Context<'_>) {
        let mut wakers = self.wakers.lock();
        match &wakers[side] {
            Some(w) if w.will_wake(cx.waker()) => {}
            _ => wakers[side] = Some(cx.waker().clone()),
        }
    }

    fn with_stream<T>(&self, f: impl FnOnce(&TcpStream) -> io::Result<T>) -> io::Result<T> {
        match &*self.state.lock() {
            State::Registered(stream) => f(stream),
            State::Closed => Err(closed()),
            other => Err(not_connected(other)),
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "channel closed")
}

fn not_connected(state: &State) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, format!("channel is {}", state.name()))
}

fn connect_in_progress(err: &io::Error) -> bool {
    #[cfg(unix)]
    if err.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }
    err.kind() == io::ErrorKind::WouldBlock
}

/// Applies configured buffer sizes. Failures are logged, never fatal.
fn tune_buffers(socket: &Socket, config: &ConnectConfig) {
    if let Some(size) = config.receive_buffer_size {
        match socket.set_recv_buffer_size(size) {
            Ok(()) => {
                let actual = socket.recv_buffer_size().ok();
                tracing::debug!(target: "plainnet::channel", requested = size, ?actual, "set receive buffer size");
            }
            Err(e) => {
                tracing::debug!(target: "plainnet::channel", requested = size, error = %e, "failed to set receive buffer size");
            }
        }
    }
    if let Some(size) = config.send_buffer_size {
        match socket.set_send_buffer_size(size) {
            Ok(()) => {
                let actual = socket.send_buffer_size().ok();
                tracing::debug!(target: "plainnet::channel", requested = size, ?actual, "set send buffer size");
            }
            Err(e) => {
                tracing::debug!(target: "plainnet::channel", requested = size, error = %e, "failed to set send buffer size");
            }
        }
    }
}

impl SocketChannel for TcpChannel {
    fn open(&self, remote: SocketAddr, config: &ConnectConfig) -> io::Result<()> {
        let mut state = self.state.lock();
        if let State::Closed = *state {
            return Err(closed());
        }

        let socket = Socket::new(Domain::for_address(remote), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        tune_buffers(&socket, config);

        tracing::trace!(target: "plainnet::channel", %remote, replaced = state.name(), "socket opened");
        *state = State::Open { socket, nodelay: config.tcp_nodelay };
        Ok(())
    }

    fn bind(&self, local: SocketAddr) -> io::Result<()> {
        match &*self.state.lock() {
            State::Open { socket, .. } => {
                socket.bind(&SockAddr::from(local))?;
                tracing::trace!(target: "plainnet::channel", %local, "socket bound");
                Ok(())
            }
            State::Closed => Err(closed()),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot bind a {} channel", other.name()),
            )),
        }
    }

    fn connect(&self, remote: SocketAddr) -> io::Result<bool> {
        let mut state = self.state.lock();
        let (socket, nodelay) = match std::mem::replace(&mut *state, State::Idle) {
            State::Open { socket, nodelay } => (socket, nodelay),
            other => {
                let err = match &other {
                    State::Closed => closed(),
                    s => not_connected(s),
                };
                *state = other;
                return Err(err);
            }
        };

        let finished = match socket.connect(&SockAddr::from(remote)) {
            Ok(()) => true,
            Err(e) if connect_in_progress(&e) => false,
            Err(e) => return Err(e),
        };

        let stream = TcpStream::from_std(socket.into())?;
        if nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(target: "plainnet::channel", error = %e, "failed to set TCP_NODELAY");
            }
        }
        tracing::trace!(target: "plainnet::channel", %remote, finished, "connect issued");
        *state = State::Registered(stream);
        Ok(finished)
    }

    fn finish_connect(&self) -> io::Result<bool> {
        // A still-connecting socket reports WouldBlock from inside `try_io`,
        // which clears tokio's cached write readiness so the next poll parks.
        let res = self.with_stream(|stream| {
            stream.try_io(tokio::io::Interest::WRITABLE, || {
                if let Some(e) = stream.take_error()? {
                    return Err(e);
                }
                match stream.peer_addr() {
                    Ok(_) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                        Err(io::ErrorKind::WouldBlock.into())
                    }
                    Err(e) => Err(e),
                }
            })
        });
        match res {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn poll_ready(&self, cx: &mut Context<'_>, interest: Interest) -> Poll<io::Result<()>> {
        let side = match interest {
            Interest::Read => READ_SIDE,
            Interest::Connect | Interest::Write => WRITE_SIDE,
        };
        self.park(side, cx);

        match &*self.state.lock() {
            State::Registered(stream) => match interest {
                Interest::Read => stream.poll_read_ready(cx),
                Interest::Connect | Interest::Write => stream.poll_write_ready(cx),
            },
            State::Closed => Poll::Ready(Err(closed())),
            other => Poll::Ready(Err(not_connected(other))),
        }
    }

    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        loop {
            ready!(self.poll_ready(cx, Interest::Read))?;
            let res = self.with_stream(|stream| stream.try_read(buf.initialize_unfilled()));
            match res {
                Ok(n) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }

    fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        loop {
            ready!(self.poll_ready(cx, Interest::Write))?;
            match self.with_stream(|stream| stream.try_write(buf)) {
                Ok(n) => return Poll::Ready(Ok(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }

    fn shutdown_write(&self) -> io::Result<()> {
        self.with_stream(|stream| SockRef::from(stream).shutdown(Shutdown::Write))
    }

    fn close(&self) -> io::Result<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), State::Closed);
        tracing::trace!(target: "plainnet::channel", was = previous.name(), "channel closed");
        drop(previous);

        let parked = std::mem::take(&mut *self.wakers.lock());
        for waker in parked.into_iter().flatten() {
            waker.wake();
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !matches!(*self.state.lock(), State::Closed)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match &*self.state.lock() {
            State::Open { socket, .. } => socket.local_addr()?.as_socket().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "not an inet socket")
            }),
            State::Registered(stream) => stream.local_addr(),
            State::Closed => Err(closed()),
            State::Idle => Err(not_connected(&State::Idle)),
        }
    }
}

impl fmt::Debug for TcpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpChannel").field("state", &self.state.lock().name()).finish()
    }
}
