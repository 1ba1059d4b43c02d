//! # plainnet
//!
//! Plain (non-TLS) TCP transport for HTTP clients, in the style of
//! Chromium's `net/socket/`.
//!
//! `plainnet` owns the part of a client between "I need a socket to
//! `host:port`" and "here is a connected byte stream":
//!
//! - **Non-blocking connect** driven by a shared reactor
//! - **Connect timeout** measured from the start of the exchange
//! - **One retry** for refused or OS-timed-out connects
//! - **Race-free teardown**: timer, cancellation, I/O errors and `close`
//!   may race; exactly one wins and all observers see the same error
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plainnet::Client;
//! use plainnet::socket::destination::Destination;
//! use std::time::Duration;
//! use tokio::io::AsyncWriteExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder().build()?;
//!     let conn = client
//!         .connect(Destination::new("example.com", 80), Some(Duration::from_secs(5)))
//!         .await?;
//!     let mut flow = conn.flow();
//!     flow.write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").await?;
//!     conn.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error definitions
//! - [`client`] - Shared client context and builder
//! - [`dns`] - Destination resolution
//! - [`socket`] - Connection lifecycle, reactor, channel and pool

pub mod base;
pub mod client;
pub mod dns;
pub mod socket;

pub use client::{Client, ClientBuilder};
