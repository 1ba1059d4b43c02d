//! Duplex byte flow over an established channel.
//!
//! A [`SocketTube`] is what a connection hands to the layer above once the
//! connect succeeds. It is `AsyncRead`/`AsyncWrite` through a shared
//! reference, so reads and writes can run from different tasks.

use crate::base::neterror::NetError;
use crate::socket::channel::SocketChannel;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::watch;

pub struct SocketTube {
    channel: Arc<dyn SocketChannel>,
    closed: watch::Sender<bool>,
    cause: OnceLock<Option<Arc<NetError>>>,
}

impl SocketTube {
    pub fn new(channel: Arc<dyn SocketChannel>) -> Self {
        let (closed, _) = watch::channel(false);
        Self { channel, closed, cause: OnceLock::new() }
    }

    /// Marks the flow closed with `cause`. Only the first call has an
    /// effect; returns whether this call was it.
    pub fn signal_closed(&self, cause: Option<Arc<NetError>>) -> bool {
        if self.cause.set(cause).is_err() {
            return false;
        }
        tracing::trace!(target: "plainnet::channel", cause = ?self.close_cause(), "tube closed");
        self.closed.send_replace(true);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.cause.get().is_some()
    }

    /// The error the flow was closed with, if any.
    pub fn close_cause(&self) -> Option<Arc<NetError>> {
        self.cause.get().cloned().flatten()
    }

    /// Resolves once the flow is closed, with the close cause.
    pub async fn closed(&self) -> Option<Arc<NetError>> {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`; `wait_for` cannot observe it dropped.
        let _ = rx.wait_for(|closed| *closed).await;
        self.close_cause()
    }

    fn closed_error(&self) -> io::Error {
        match self.close_cause() {
            Some(cause) => io::Error::new(io::ErrorKind::NotConnected, (*cause).clone()),
            None => io::Error::new(io::ErrorKind::NotConnected, NetError::ConnectionClosed),
        }
    }
}

impl AsyncRead for &SocketTube {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let tube: &SocketTube = *self.get_mut();
        if tube.is_closed() {
            return Poll::Ready(Err(tube.closed_error()));
        }
        tube.channel.poll_read(cx, buf)
    }
}

impl AsyncWrite for &SocketTube {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let tube: &SocketTube = *self.get_mut();
        if tube.is_closed() {
            return Poll::Ready(Err(tube.closed_error()));
        }
        tube.channel.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let tube: &SocketTube = *self.get_mut();
        if tube.is_closed() {
            return Poll::Ready(Ok(()));
        }
        Poll::Ready(tube.channel.shutdown_write())
    }
}

impl fmt::Debug for SocketTube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketTube")
            .field("channel", &self.channel)
            .field("closed", &self.is_closed())
            .finish()
    }
}
