//! Who a connection talks to, and how it is keyed for reuse.

use crate::base::neterror::NetError;
use std::fmt;
use url::Url;

/// A logical `host:port` endpoint, resolved only when a connect starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    host: String,
    port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Destination of an `http://` (or any known-port scheme) URL.
    pub fn from_url(url: &Url) -> Result<Self, NetError> {
        let host = url.host_str().ok_or(NetError::AddressInvalid)?;
        let port = url.port_or_known_default().ok_or(NetError::AddressInvalid)?;
        // IPv6 hosts come back bracketed from `host_str`.
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Immutable identity of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    pub destination: Destination,
    /// `Some` when this connection is a hop to a proxy.
    pub proxy: Option<Destination>,
    pub label: Option<String>,
}

impl ConnectionIdentity {
    pub fn direct(destination: Destination) -> Self {
        Self { destination, proxy: None, label: None }
    }

    pub fn proxied(destination: Destination, proxy: Destination) -> Self {
        Self { destination, proxy: Some(proxy), label: None }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The endpoint the socket actually connects to.
    pub fn connect_target(&self) -> &Destination {
        self.proxy.as_ref().unwrap_or(&self.destination)
    }

    pub fn cache_key(&self) -> CacheKey {
        match &self.proxy {
            Some(proxy) => CacheKey {
                secure: false,
                destination: None,
                proxy: Some(proxy.clone()),
                label: self.label.clone(),
            },
            None => CacheKey {
                secure: false,
                destination: Some(self.destination.clone()),
                proxy: None,
                label: self.label.clone(),
            },
        }
    }
}

/// Reuse key for a plain connection.
///
/// A proxied plain connection is keyed by the proxy alone: requests to
/// different origins share the hop.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub secure: bool,
    pub destination: Option<Destination>,
    pub proxy: Option<Destination>,
    pub label: Option<String>,
}
