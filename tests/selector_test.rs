//! Selector Tests
//!
//! Covers:
//! - Outstanding registrations aborted with `ConnectionClosed` on stop
//! - In-flight connect failing when the client shuts down
//! - Readiness dispatch re-armed by a handler

mod common;

use common::*;
use plainnet::base::neterror::NetError;
use plainnet::socket::channel::SocketChannel;
use plainnet::socket::connection::PlainConnection;
use plainnet::socket::destination::{ConnectionIdentity, Destination};
use plainnet::socket::exchange::Exchange;
use plainnet::socket::reactor::{AsyncEvent, Interest, Reactor};
use plainnet::socket::selector::SelectorManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

struct Probe {
    channel: Arc<FakeChannel>,
    rearm: usize,
    reactor: Arc<SelectorManager>,
    handled: Arc<AtomicUsize>,
    done: mpsc::UnboundedSender<Result<usize, NetError>>,
}

impl AsyncEvent for Probe {
    fn channel(&self) -> Arc<dyn SocketChannel> {
        self.channel.clone()
    }

    fn interest(&self) -> Interest {
        Interest::Read
    }

    fn handle(mut self: Box<Self>) {
        let n = self.handled.fetch_add(1, Ordering::SeqCst) + 1;
        if self.rearm > 0 {
            self.rearm -= 1;
            let reactor = self.reactor.clone();
            reactor.register_event(self);
        } else {
            let _ = self.done.send(Ok(n));
        }
    }

    fn abort(self: Box<Self>, cause: NetError) {
        let _ = self.done.send(Err(cause));
    }
}

#[tokio::test]
async fn test_stop_aborts_outstanding() {
    let selector = Arc::new(SelectorManager::spawn(&Handle::current()));
    let (done, mut rx) = mpsc::unbounded_channel();
    let handled = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        selector.register_event(Box::new(Probe {
            channel: Arc::new(FakeChannel::new(Readiness::Never)),
            rearm: 0,
            reactor: selector.clone(),
            handled: handled.clone(),
            done: done.clone(),
        }));
    }
    tokio::task::yield_now().await;

    selector.stop();
    for _ in 0..3 {
        assert_eq!(rx.recv().await.unwrap().unwrap_err(), NetError::ConnectionClosed);
    }
    assert_eq!(handled.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_handler_can_reregister() {
    let selector = Arc::new(SelectorManager::spawn(&Handle::current()));
    let (done, mut rx) = mpsc::unbounded_channel();
    let handled = Arc::new(AtomicUsize::new(0));

    selector.register_event(Box::new(Probe {
        channel: Arc::new(FakeChannel::new(Readiness::Immediate)),
        rearm: 2,
        reactor: selector.clone(),
        handled: handled.clone(),
        done,
    }));

    assert_eq!(rx.recv().await.unwrap().unwrap(), 3);
    selector.stop();
}

#[tokio::test]
async fn test_client_shutdown_fails_inflight_connect() {
    let pool = Arc::new(CountingPool::default());
    let client = builder()
        .resolver(Arc::new(StaticResolver::loopback()))
        .pool(pool.clone())
        .build()
        .unwrap();
    let channel = Arc::new(FakeChannel::new(Readiness::Never));
    let conn = PlainConnection::with_channel(
        client.clone(),
        ConnectionIdentity::direct(Destination::new("stuck.test", 80)),
        channel.clone(),
    );

    let task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.connect(&Exchange::new(None)).await })
    };
    while FakeChannel::count(&channel.connects) == 0 {
        tokio::task::yield_now().await;
    }

    client.shutdown();
    let err = task.await.unwrap().unwrap_err();
    assert_eq!(*err.net_error(), NetError::ConnectionClosed);
    assert!(conn.is_closed());
    assert_eq!(FakeChannel::count(&channel.closes), 1);
    assert_eq!(pool.closed.load(Ordering::SeqCst), 1);
}
