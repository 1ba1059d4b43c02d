//! DNS Resolution Module
//!
//! Provides pluggable destination resolution:
//! - System resolver (getaddrinfo via thread pool)
//! - Hostname-to-IP override mechanism
//! - IP literal bypass and local-family preference
//!
//! # Example
//!
//! ```rust,ignore
//! use plainnet::dns::{resolve_address, GaiResolver};
//!
//! let addr = resolve_address(&GaiResolver::new(), "example.com", 80, None).await?;
//! ```

mod gai;
mod resolve;

pub use gai::{GaiResolver, SocketAddrs};
pub use resolve::{resolve_address, Addrs, DnsResolverWithOverrides, Name, Resolve, Resolving};
