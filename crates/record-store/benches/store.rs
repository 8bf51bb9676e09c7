use criterion::{black_box, criterion_group, criterion_main, Criterion};
use data_convert::Value;
use record_store::RecordStore;

fn bench_link(c: &mut Criterion) {
    let store = RecordStore::new(200, vec![Value::Float(0.0); 64]).unwrap();
    c.bench_function("create_link_64_values", |b| {
        b.iter(|| {
            let mut pending = store.create();
            pending.values_mut()[0] = Value::Float(1.5);
            black_box(store.link(pending))
        })
    });
}

fn bench_walk(c: &mut Criterion) {
    let store = RecordStore::new(200, vec![Value::Float(0.0); 64]).unwrap();
    for _ in 0..150 {
        let pending = store.create();
        store.link(pending);
    }
    c.bench_function("walk_100_records", |b| {
        b.iter(|| {
            let mut id = store.newest();
            for _ in 0..100 {
                id = match store.prev(id) {
                    Ok(Some(prev)) => prev,
                    _ => break,
                };
            }
            black_box(store.get(id).map(|r| r.t_ms))
        })
    });
}

criterion_group!(benches, bench_link, bench_walk);
criterion_main!(benches);
