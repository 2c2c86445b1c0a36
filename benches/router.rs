//! Router benchmark suite.
//!
//! Measures the per-action cost of the middleware over the memory transport:
//! - Passthrough of plain actions
//! - Fire-and-forget emits on a connected socket
//! - Inbound events fanned out through bound listeners
//!
//! Run with: cargo bench --bench router
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use socket_middleware::{
    Action, ConnectionConfig, ListenerSpec, MemoryTransport, OutboundCall, SocketMiddleware, kinds,
};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const BATCH_SIZES: &[usize] = &[1, 100, 1_000];
const LISTENER_COUNTS: &[usize] = &[1, 16];

// ============================================================================
// Setup
// ============================================================================

/// Builds a middleware whose dispatched actions are counted.
fn counting_middleware(transport: &MemoryTransport, listeners: usize) -> (SocketMiddleware, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let dispatched = Arc::clone(&counter);

    let middleware = SocketMiddleware::builder()
        .listeners((0..listeners).map(|_| ListenerSpec::bind("block", "NEW_BLOCK")))
        .transport(transport.clone())
        .build(
            move |_: Action| {
                dispatched.fetch_add(1, Ordering::Relaxed);
            },
            |action: Action| {
                black_box(action);
            },
        )
        .expect("build");

    (middleware, counter)
}

/// Connects `middleware` and waits for the handshake to finish.
fn connect(rt: &Runtime, transport: &MemoryTransport, listeners: usize) -> SocketMiddleware {
    rt.block_on(async {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let middleware = SocketMiddleware::builder()
            .listeners((0..listeners).map(|_| ListenerSpec::bind("block", "NEW_BLOCK")))
            .transport(transport.clone())
            .build(
                move |action: Action| {
                    if action.is(kinds::SOCKET_CONNECTED) {
                        let _ = tx.send(());
                    }
                },
                |_: Action| {},
            )
            .expect("build");

        middleware.handle(Action::connect_socket(ConnectionConfig::new("localhost", 1)));
        transport.last_socket().expect("socket").open();
        rx.recv().await.expect("connected");

        middleware
    })
}

// ============================================================================
// Benchmark: Passthrough
// ============================================================================

fn bench_passthrough(c: &mut Criterion) {
    let transport = MemoryTransport::new();
    let (middleware, _) = counting_middleware(&transport, 0);

    let mut group = c.benchmark_group("passthrough");

    for &batch in BATCH_SIZES {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                for i in 0..batch {
                    middleware.handle(Action::with_payload("ADD_TODO", json!(i)));
                }
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Emit
// ============================================================================

fn bench_emit(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let transport = MemoryTransport::new();
    let middleware = connect(&rt, &transport, 0);

    let mut group = c.benchmark_group("emit_fire");

    for &batch in BATCH_SIZES {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                for i in 0..batch {
                    middleware.handle(Action::emit_socket(
                        OutboundCall::new("watch", "chain").arg(i),
                    ));
                }
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Listener Fan-out
// ============================================================================

fn bench_listener_fanout(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let mut group = c.benchmark_group("listener_fanout");

    for &listeners in LISTENER_COUNTS {
        let transport = MemoryTransport::new();
        let _middleware = connect(&rt, &transport, listeners);
        let socket = transport.last_socket().expect("socket");

        group.throughput(Throughput::Elements(listeners as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(listeners),
            &listeners,
            |b, _| {
                b.iter(|| black_box(socket.deliver("block", vec![json!(1)])));
            },
        );
    }

    group.finish();
}

// ============================================================================
// Criterion Setup
// ============================================================================

criterion_group!(benches, bench_passthrough, bench_emit, bench_listener_fanout);
criterion_main!(benches);
