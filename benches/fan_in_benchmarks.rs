use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fetchflow_core::config::CircuitBreakerConfig;
use fetchflow_core::endpoint::{EndpointKind, EndpointPool};
use fetchflow_core::fan_in::{FanInSynchronizer, InMemoryFanIn};
use fetchflow_core::models::{FieldMask, ResourceKey};
use fetchflow_core::test_helpers::{default_endpoints, sample_transaction};

fn benchmark_fan_in_cycle(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let fan_in = InMemoryFanIn::new();
    let parent = ResourceKey::from("bench-parent");

    let mut group = c.benchmark_group("fan_in_cycle");
    for children in [1u32, 8, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(children), &children, |b, &n| {
            b.iter(|| {
                runtime.block_on(async {
                    fan_in.register(&parent, n).await.unwrap();
                    for _ in 0..n {
                        black_box(fan_in.complete(&parent).await.unwrap());
                    }
                })
            })
        });
    }
    group.finish();
}

fn benchmark_endpoint_reservation(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let pool =
        EndpointPool::from_config(&default_endpoints(), &CircuitBreakerConfig::default()).unwrap();
    let primary = pool.ids_of_kind(EndpointKind::PrimaryRpc)[0];

    c.bench_function("endpoint_permit_and_throttle", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let _permit = pool.acquire(primary).await.unwrap();
                black_box(pool.throttle(primary).await.unwrap())
            })
        })
    });
}

fn benchmark_field_mask_projection(c: &mut Criterion) {
    let document = sample_transaction("bench-sig", &["mintA", "mintB", "mintC"]).to_document();
    c.bench_function("field_mask_core_balances", |b| {
        b.iter(|| (FieldMask::CORE | FieldMask::TOKEN_BALANCES).project(black_box(&document)))
    });
}

criterion_group!(
    benches,
    benchmark_fan_in_cycle,
    benchmark_endpoint_reservation,
    benchmark_field_mask_projection
);
criterion_main!(benches);
