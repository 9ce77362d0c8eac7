use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::time::Duration;

use joblock_core::JobLocker;
use joblock_core::infrastructure_in_memory::InMemoryJobAccess;
use joblock_core::types::OwnerId;

const LEASE: Duration = Duration::from_secs(45);

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
}

fn bench_acquire_release(c: &mut Criterion) {
    let rt = runtime();
    let store = InMemoryJobAccess::new();
    let owner = OwnerId::new("instance-1");

    c.bench_function("lock_acquire_release_cycle", |b| {
        b.iter(|| {
            rt.block_on(async {
                let granted = store.acquire("order-1", &owner, LEASE).await.unwrap();
                store.release("order-1", &owner).await.unwrap();
                black_box(granted)
            })
        })
    });
}

fn bench_contended_acquire(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("lock_contention");

    for owners in [10, 50, 100] {
        group.bench_with_input(BenchmarkId::new("owners", owners), &owners, |b, &count| {
            b.iter(|| {
                let store = InMemoryJobAccess::new();
                rt.block_on(async {
                    let mut granted = 0;
                    for i in 0..count {
                        let owner = OwnerId::new(format!("instance-{}", i));
                        if store.acquire("order-1", &owner, LEASE).await.unwrap() {
                            granted += 1;
                        }
                    }
                    black_box(granted)
                })
            })
        });
    }

    group.finish();
}

#[cfg(feature = "sqlite")]
fn bench_sqlite_renew(c: &mut Criterion) {
    use joblock_core::infrastructure_sqlite::SqliteJobAccess;

    let rt = runtime();
    let store = SqliteJobAccess::open_in_memory().unwrap();
    let owner = OwnerId::new("instance-1");
    rt.block_on(store.acquire("order-1", &owner, LEASE)).unwrap();

    c.bench_function("sqlite_renew", |b| {
        b.iter(|| black_box(rt.block_on(store.renew("order-1", &owner, LEASE)).unwrap()))
    });
}

#[cfg(not(feature = "sqlite"))]
fn bench_sqlite_renew(_c: &mut Criterion) {}

criterion_group!(benches, bench_acquire_release, bench_contended_acquire, bench_sqlite_renew);
criterion_main!(benches);
