use criterion::{Criterion, criterion_group, criterion_main};
use hubrt::prelude::*;
use std::hint::black_box;

fn base_app() -> Application {
    let app = Application::with_config(AppConfig {
        autosave_period_secs: 0,
        handle_signals: false,
    });
    app.add_gateway("local", EchoGateway::new()).unwrap();
    app
}

/// One full publish → echo → deliver round trip through the dispatch loop.
fn publish_round_trip(c: &mut Criterion) {
    let app = base_app();
    let (tx, rx) = crossbeam::channel::bounded::<()>(1);
    app.subscribe("local/bench", move |message: &Message| {
        black_box(message.topic());
        let _ = tx.send(());
    })
    .unwrap();
    app.launch().unwrap();

    c.bench_function("publish_round_trip", |b| {
        b.iter(|| {
            app.publish(Message::empty("local/bench")).unwrap();
            rx.recv().unwrap();
        })
    });

    app.request_exit();
    app.join().unwrap();
}

/// Delivery with a crowd of wildcard subscribers that all match.
fn wildcard_fan_out(c: &mut Criterion) {
    let app = base_app();
    let (tx, rx) = crossbeam::channel::bounded::<()>(1);
    for _ in 0..15 {
        app.subscribe("local/a/+/c", |message: &Message| {
            black_box(message.payload());
        })
        .unwrap();
    }
    app.subscribe_with_priority(
        "local/a/#",
        move |_: &Message| {
            let _ = tx.send(());
        },
        -1,
    )
    .unwrap();
    app.launch().unwrap();

    c.bench_function("wildcard_fan_out_16", |b| {
        b.iter(|| {
            app.publish(Message::empty("local/a/b/c")).unwrap();
            rx.recv().unwrap();
        })
    });

    app.request_exit();
    app.join().unwrap();
}

criterion_group!(benches, publish_round_trip, wildcard_fan_out);
criterion_main!(benches);
