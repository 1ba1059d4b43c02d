//! Client: the shared context connections are created from.
//!
//! A [`Client`] bundles the collaborators every connection needs (reactor,
//! executor, pool, resolver) with the socket configuration and retry
//! policy. It is cheap to clone.
//!
//! # Example
//!
//! ```rust,ignore
//! use plainnet::{Client, socket::destination::Destination};
//! use std::time::Duration;
//!
//! let client = Client::builder().build()?;
//! let conn = client
//!     .connect(Destination::new("example.com", 80), Some(Duration::from_secs(5)))
//!     .await?;
//! let mut flow = conn.flow();
//! ```

use crate::base::neterror::{ConnectError, NetError};
use crate::dns::{GaiResolver, Resolve};
use crate::socket::config::ConnectConfig;
use crate::socket::connection::PlainConnection;
use crate::socket::destination::{ConnectionIdentity, Destination};
use crate::socket::exchange::Exchange;
use crate::socket::pool::{ClientSocketPool, ConnectionPool};
use crate::socket::reactor::{Executor, Reactor, TokioExecutor};
use crate::socket::retry::RetryPolicy;
use crate::socket::selector::SelectorManager;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use url::Url;

struct ClientInner {
    reactor: Arc<dyn Reactor>,
    executor: Arc<dyn Executor>,
    pool: Arc<dyn ConnectionPool>,
    resolver: Arc<dyn Resolve>,
    config: ConnectConfig,
    retry: RetryPolicy,
    shut_down: AtomicBool,
}

/// Shared connection context.
///
/// Use [`Client::builder()`] to configure and create a client.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// A new, unconnected direct connection to `destination`.
    pub fn new_connection(&self, destination: Destination) -> Arc<PlainConnection> {
        self.connection_for(ConnectionIdentity::direct(destination))
    }

    /// A new, unconnected plain connection to `proxy`, on behalf of
    /// `destination`.
    pub fn new_proxy_connection(
        &self,
        destination: Destination,
        proxy: Destination,
    ) -> Arc<PlainConnection> {
        self.connection_for(ConnectionIdentity::proxied(destination, proxy))
    }

    pub fn connection_for(&self, identity: ConnectionIdentity) -> Arc<PlainConnection> {
        PlainConnection::new(self.clone(), identity)
    }

    /// Creates and connects a direct connection in one step.
    pub async fn connect(
        &self,
        destination: Destination,
        connect_timeout: Option<Duration>,
    ) -> Result<Arc<PlainConnection>, ConnectError> {
        let connection = self.new_connection(destination);
        let exchange = Exchange::new(connect_timeout);
        connection.connect(&exchange).await?;
        Ok(connection)
    }

    /// Like [`connect`](Client::connect), with the destination taken from `url`.
    pub async fn connect_url(
        &self,
        url: &Url,
        connect_timeout: Option<Duration>,
    ) -> Result<Arc<PlainConnection>, ConnectError> {
        let destination =
            Destination::from_url(url).map_err(|e| ConnectError::new(url.as_str(), Arc::new(e)))?;
        self.connect(destination, connect_timeout).await
    }

    /// Stops the reactor and closes every pooled connection.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("shutting down client");
        self.inner.reactor.shutdown();
        self.inner.pool.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    pub fn reactor(&self) -> &Arc<dyn Reactor> {
        &self.inner.reactor
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.inner.executor
    }

    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.inner.pool
    }

    pub fn resolver(&self) -> &Arc<dyn Resolve> {
        &self.inner.resolver
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.inner.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("retry", &self.inner.retry)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// Builder for creating a [`Client`].
///
/// Unset collaborators get production defaults: a [`SelectorManager`] and
/// a [`TokioExecutor`] on the current runtime, a [`ClientSocketPool`] and a
/// [`GaiResolver`]. Config and retry policy default to their `from_env`
/// values.
#[derive(Default)]
pub struct ClientBuilder {
    runtime: Option<Handle>,
    reactor: Option<Arc<dyn Reactor>>,
    executor: Option<Arc<dyn Executor>>,
    pool: Option<Arc<dyn ConnectionPool>>,
    resolver: Option<Arc<dyn Resolve>>,
    config: Option<ConnectConfig>,
    retry: Option<RetryPolicy>,
}

impl ClientBuilder {
    /// Runtime the default reactor and executor run on.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn reactor(mut self, reactor: Arc<dyn Reactor>) -> Self {
        self.reactor = Some(reactor);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn pool(mut self, pool: Arc<dyn ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(mut self, config: ConnectConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Build the client.
    ///
    /// Fails with `ContextShutDown` if a default reactor or executor is
    /// needed and there is no tokio runtime to run it on.
    pub fn build(self) -> Result<Client, NetError> {
        let needs_runtime = self.reactor.is_none() || self.executor.is_none();
        let handle = match self.runtime {
            Some(handle) => Some(handle),
            None if needs_runtime => Some(Handle::try_current().map_err(|e| {
                tracing::debug!(error = %e, "no tokio runtime for client defaults");
                NetError::ContextShutDown
            })?),
            None => None,
        };

        let reactor = match (self.reactor, &handle) {
            (Some(reactor), _) => reactor,
            (None, Some(handle)) => Arc::new(SelectorManager::spawn(handle)) as Arc<dyn Reactor>,
            (None, None) => return Err(NetError::ContextShutDown),
        };
        let executor = match (self.executor, handle) {
            (Some(executor), _) => executor,
            (None, Some(handle)) => Arc::new(TokioExecutor::new(handle)) as Arc<dyn Executor>,
            (None, None) => return Err(NetError::ContextShutDown),
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                reactor,
                executor,
                pool: self.pool.unwrap_or_else(|| Arc::new(ClientSocketPool::new())),
                resolver: self.resolver.unwrap_or_else(|| Arc::new(GaiResolver::new())),
                config: self.config.unwrap_or_else(ConnectConfig::from_env),
                retry: self.retry.unwrap_or_else(RetryPolicy::from_env),
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}
