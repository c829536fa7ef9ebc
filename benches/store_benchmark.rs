use criterion::{Criterion, black_box, criterion_group, criterion_main};
use web_recorder::store::ImageStore;

fn benchmark_store(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = ImageStore::open(dir.path()).unwrap();
    let payload = vec![0xab_u8; 64 * 1024];

    // First store pays the write; every following store of the same bytes is
    // a hash plus an existence check. That repeated path is what dominates a
    // real run with autocapture on.
    store.store(&payload).unwrap();

    c.bench_function("store_duplicate_64k", |b| {
        b.iter(|| {
            let stored = store.store(black_box(&payload)).unwrap();
            assert!(!stored.fingerprint.is_empty());
        })
    });
}

criterion_group!(benches, benchmark_store);
criterion_main!(benches);
