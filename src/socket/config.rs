//! Socket-level connect configuration.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;

pub const LOCAL_ADDRESS_ENV: &str = "PLAINNET_LOCAL_ADDRESS";
pub const RECEIVE_BUFFER_SIZE_ENV: &str = "PLAINNET_RECEIVE_BUFFER_SIZE";
pub const SEND_BUFFER_SIZE_ENV: &str = "PLAINNET_SEND_BUFFER_SIZE";

/// Options applied to every socket a client opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Local address to bind before connecting (port chosen by the OS).
    pub local_address: Option<IpAddr>,
    /// SO_RCVBUF; `None` keeps the OS default.
    pub receive_buffer_size: Option<usize>,
    /// SO_SNDBUF; `None` keeps the OS default.
    pub send_buffer_size: Option<usize>,
    pub tcp_nodelay: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            local_address: None,
            receive_buffer_size: None,
            send_buffer_size: None,
            tcp_nodelay: true,
        }
    }
}

impl ConnectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `PLAINNET_*` environment variables.
    ///
    /// Unparseable values are logged and ignored; a buffer size of `0`
    /// means "keep the OS default".
    pub fn from_env() -> Self {
        Self {
            local_address: env_value(LOCAL_ADDRESS_ENV),
            receive_buffer_size: env_value(RECEIVE_BUFFER_SIZE_ENV).filter(|&n: &usize| n > 0),
            send_buffer_size: env_value(SEND_BUFFER_SIZE_ENV).filter(|&n: &usize| n > 0),
            ..Self::default()
        }
    }

    /// Set the local bind address.
    pub fn local_address(mut self, addr: IpAddr) -> Self {
        self.local_address = Some(addr);
        self
    }

    /// Set the receive buffer size.
    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = Some(size);
        self
    }

    /// Set the send buffer size.
    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Enable or disable TCP_NODELAY.
    pub fn tcp_nodelay(mut self, enable: bool) -> Self {
        self.tcp_nodelay = enable;
        self
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(variable = name, value = %raw, error = %e, "ignoring invalid setting");
            None
        }
    }
}
