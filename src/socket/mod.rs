//! Plain TCP connection establishment.
//!
//! - [`connection`]: the connection state machine (connect, retry, close)
//! - [`reactor`] / [`selector`]: readiness and timer dispatch
//! - [`channel`] / [`tube`]: the raw socket and the duplex flow over it
//! - [`pool`]: opened/closed bookkeeping

pub mod channel;
pub mod config;
pub mod connection;
pub mod destination;
pub mod exchange;
pub mod pending;
pub mod pool;
pub mod reactor;
pub mod retry;
pub mod selector;
pub mod timer;
pub mod tube;
