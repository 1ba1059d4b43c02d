//! System DNS resolver using getaddrinfo.
//!
//! Resolution runs on tokio's blocking pool so a slow lookup never stalls
//! the dispatch task that drives connect readiness.

use super::{Addrs, Name, Resolve, Resolving};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use std::{
    io,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
};

/// System DNS resolver using `getaddrinfo` in a thread pool.
#[derive(Clone, Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let domain = name.as_str().to_string();
            let host = domain.clone();

            let joined = tokio::task::spawn_blocking(move || {
                tracing::debug!(host = %host, "resolving via getaddrinfo");
                (host.as_str(), 0u16).to_socket_addrs().map(|iter| iter.collect::<Vec<_>>())
            })
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "DNS resolution task failed");
                NetError::NameNotResolved
            })?;

            let addrs = joined.dns_context(&domain).inspect_err(|e| {
                tracing::debug!(domain = %domain, error = %e, "DNS resolution failed");
            })?;

            if addrs.is_empty() {
                return Err(NetError::dns_failed(
                    &domain,
                    io::Error::new(io::ErrorKind::NotFound, "no addresses returned by getaddrinfo"),
                ));
            }

            tracing::debug!(domain = %domain, count = addrs.len(), "DNS resolution complete");
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

/// An ordered set of candidate addresses for one destination.
#[derive(Debug, Clone, Default)]
pub struct SocketAddrs {
    addrs: Vec<SocketAddr>,
}

impl SocketAddrs {
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self { addrs }
    }

    /// Parses `host` as an IP literal, bypassing DNS.
    ///
    /// Returns `None` if `host` is a name that needs resolving. Bracketed
    /// IPv6 literals (as they appear in URLs) are accepted.
    pub fn try_parse(host: &str, port: u16) -> Option<Self> {
        let bare = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
        bare.parse::<IpAddr>().ok().map(|ip| Self { addrs: vec![SocketAddr::new(ip, port)] })
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn as_slice(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Overrides the port on every candidate.
    pub fn with_port(mut self, port: u16) -> Self {
        for addr in &mut self.addrs {
            addr.set_port(port);
        }
        self
    }

    /// Splits candidates into (preferred, fallback) by address family.
    ///
    /// With a local bind address only its family is usable, so the fallback
    /// is empty. Without one, the family of the first answer is preferred
    /// and the other family is kept as fallback.
    pub fn prefer_family(self, local: Option<IpAddr>) -> (Self, Self) {
        match local {
            Some(local) => {
                let addrs = self.addrs.into_iter().filter(|a| a.is_ipv4() == local.is_ipv4()).collect();
                (Self { addrs }, Self::default())
            }
            None => {
                let prefer_v6 = self.addrs.first().is_some_and(|a| a.is_ipv6());
                let (preferred, fallback): (Vec<_>, Vec<_>) =
                    self.addrs.into_iter().partition(|a| a.is_ipv6() == prefer_v6);
                (Self { addrs: preferred }, Self { addrs: fallback })
            }
        }
    }

    /// The address a single connect sequence should use.
    pub fn first_usable(self, local: Option<IpAddr>) -> Option<SocketAddr> {
        let (preferred, fallback) = self.prefer_family(local);
        preferred.addrs.into_iter().chain(fallback.addrs).next()
    }
}

impl IntoIterator for SocketAddrs {
    type Item = SocketAddr;
    type IntoIter = std::vec::IntoIter<SocketAddr>;

    fn into_iter(self) -> Self::IntoIter {
        self.addrs.into_iter()
    }
}
