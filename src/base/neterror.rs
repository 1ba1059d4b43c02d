use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum NetError {
    // Generic
    #[error("Request aborted")]
    Aborted,
    #[error("Context shut down")]
    ContextShutDown,

    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Internet disconnected")]
    InternetDisconnected,
    #[error("Address invalid")]
    AddressInvalid,
    #[error("Address unreachable")]
    AddressUnreachable,
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Network access denied")]
    NetworkAccessDenied,
    #[error("Address in use")]
    AddressInUse,

    // Errors carrying the failing endpoint
    #[error("Connection to {host}:{port} failed: {source}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Name {domain} not resolved: {source}")]
    NameNotResolvedFor {
        domain: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Bind to local address {addr} failed: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::Aborted => -3,
            NetError::ContextShutDown => -26,
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::NameNotResolved => -105,
            NetError::InternetDisconnected => -106,
            NetError::AddressInvalid => -108,
            NetError::AddressUnreachable => -109,
            NetError::SocketNotConnected => -112,
            NetError::ConnectionTimedOut => -118,
            NetError::NetworkAccessDenied => -138,
            NetError::AddressInUse => -147,
            NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolvedFor { .. } => -105,
            NetError::BindFailed { source, .. } => match source.kind() {
                io::ErrorKind::AddrInUse => -147,
                io::ErrorKind::PermissionDenied => -138,
                _ => -108,
            },
            NetError::Unknown(code) => *code,
        }
    }

    /// Context-rich connect failure for `host:port`.
    ///
    /// Refusals and timeouts keep their dedicated variants so retry
    /// classification does not need to look inside the I/O error.
    pub fn connection_failed_to(host: &str, port: u16, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            _ => NetError::ConnectionFailedTo {
                host: host.to_string(),
                port,
                source: Arc::new(source),
            },
        }
    }

    pub fn dns_failed(domain: &str, source: io::Error) -> Self {
        NetError::NameNotResolvedFor { domain: domain.to_string(), source: Arc::new(source) }
    }

    pub fn bind_failed(addr: SocketAddr, source: io::Error) -> Self {
        NetError::BindFailed { addr, source: Arc::new(source) }
    }

    /// True for the connect-exception class: the peer refused, or the
    /// handshake timed out at the OS level.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, NetError::ConnectionRefused | NetError::ConnectionTimedOut)
    }
}

impl From<io::Error> for NetError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
            io::ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
            io::ErrorKind::NotConnected => NetError::SocketNotConnected,
            io::ErrorKind::AddrInUse => NetError::AddressInUse,
            io::ErrorKind::AddrNotAvailable => NetError::AddressInvalid,
            io::ErrorKind::PermissionDenied => NetError::NetworkAccessDenied,
            io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => {
                NetError::ConnectionClosed
            }
            _ => NetError::ConnectionFailed,
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -3 => NetError::Aborted,
            -26 => NetError::ContextShutDown,
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -106 => NetError::InternetDisconnected,
            -108 => NetError::AddressInvalid,
            -109 => NetError::AddressUnreachable,
            -112 => NetError::SocketNotConnected,
            -118 => NetError::ConnectionTimedOut,
            -138 => NetError::NetworkAccessDenied,
            -147 => NetError::AddressInUse,
            _ => NetError::Unknown(code),
        }
    }
}

/// Net errors compare by code; the attached endpoint context is informational.
impl PartialEq for NetError {
    fn eq(&self, other: &Self) -> bool {
        self.as_i32() == other.as_i32()
    }
}

impl Eq for NetError {}

/// Which path resolved a failed connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectErrorKind {
    /// The socket could not be connected, or the connection was closed.
    #[default]
    Failed,
    /// The connection's connect timer fired.
    Timeout,
    /// The exchange was cancelled by someone other than the connect timer.
    Cancelled,
}

/// The error returned by a failed connect.
///
/// Wraps the first error recorded on the connection, so every observer of
/// the same connection sees the identical cause. The [`kind`](Self::kind)
/// tells a connect timeout apart from an OS-level `ConnectionTimedOut`.
#[derive(Debug, Clone, Error)]
#[error("connect to {target} failed: {cause}")]
pub struct ConnectError {
    target: String,
    kind: ConnectErrorKind,
    #[source]
    cause: Arc<NetError>,
}

impl ConnectError {
    pub fn new(target: impl Into<String>, cause: Arc<NetError>) -> Self {
        Self { target: target.into(), kind: ConnectErrorKind::Failed, cause }
    }

    pub fn with_kind(mut self, kind: ConnectErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// The `host:port` the connect was aimed at.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn kind(&self) -> ConnectErrorKind {
        self.kind
    }

    pub fn cause(&self) -> &Arc<NetError> {
        &self.cause
    }

    pub fn net_error(&self) -> &NetError {
        &self.cause
    }

    /// The connect timer fired before the connect completed.
    pub fn is_timeout(&self) -> bool {
        self.kind == ConnectErrorKind::Timeout
    }

    /// The exchange was cancelled, whatever the cause.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ConnectErrorKind::Cancelled
    }
}
