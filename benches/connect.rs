use criterion::{black_box, criterion_group, criterion_main, Criterion};
use plainnet::base::neterror::NetError;
use plainnet::socket::config::ConnectConfig;
use plainnet::socket::destination::{ConnectionIdentity, Destination};
use plainnet::socket::retry::RetryPolicy;
use plainnet::Client;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

/// Full connect/close cycle against a loopback listener.
fn benchmark_loopback_connect(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (client, port) = rt.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });
        let client = Client::builder()
            .config(ConnectConfig::default())
            .retry_policy(RetryPolicy::default())
            .build()
            .unwrap();
        (client, port)
    });

    c.bench_function("loopback_connect_close", |b| {
        b.to_async(&rt).iter(|| async {
            let conn = client.connect(Destination::new("127.0.0.1", port), None).await.unwrap();
            conn.close();
            black_box(conn.id())
        })
    });

    rt.block_on(async { client.shutdown() });
}

/// Pure in-memory decisions made on every failed attempt.
fn benchmark_retry_policy(c: &mut Criterion) {
    let policy = RetryPolicy::default();
    c.bench_function("retry_can_retry", |b| {
        b.iter(|| {
            black_box(policy.can_retry(black_box(&NetError::ConnectionRefused), 0, None));
            black_box(policy.can_retry(black_box(&NetError::ConnectionReset), 0, None));
        })
    });

    let identity = ConnectionIdentity::proxied(
        Destination::new("example.com", 80),
        Destination::new("proxy.local", 3128),
    )
    .with_label("bench");
    c.bench_function("cache_key", |b| b.iter(|| black_box(identity.cache_key())));
}

criterion_group!(benches, benchmark_loopback_connect, benchmark_retry_policy);
criterion_main!(benches);
