//! Benchmarks for the registry and lazy service resolution

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use lokstra::registry::{
    ConfigMap, DepsMap, Registry, ServiceFactory, ServiceInstance, ServiceTypeDef,
};
use std::hint::black_box;
use std::sync::Arc;

#[derive(Debug)]
#[allow(dead_code)]
struct SmallService {
    value: i32,
}

fn small_factory() -> ServiceFactory {
    Arc::new(|_: &DepsMap, _: &ConfigMap| {
        Ok(Arc::new(SmallService { value: 42 }) as ServiceInstance)
    })
}

fn registry_with_services(count: usize) -> Registry {
    let registry = Registry::new();
    registry.register_service_type("small", ServiceTypeDef::local(small_factory()));
    for i in 0..count {
        registry.register_lazy_service(&format!("svc-{i}"), "small", &[]);
    }
    registry
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");
    group.throughput(Throughput::Elements(1));
    group.bench_function("register_lazy_service", |b| {
        let registry = Registry::new();
        registry.register_service_type("small", ServiceTypeDef::local(small_factory()));
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            registry.register_lazy_service(&format!("svc-{i}"), "small", &[]);
        });
    });
    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_service_cold", |b| {
        b.iter_with_setup(
            || registry_with_services(1),
            |registry| {
                black_box(registry.get_service("svc-0").unwrap());
            },
        );
    });

    group.bench_function("get_service_hot", |b| {
        let registry = registry_with_services(1);
        registry.get_service("svc-0").unwrap();
        b.iter(|| {
            black_box(registry.get_service("svc-0").unwrap());
        });
    });

    group.bench_function("get_service_hot_64_services", |b| {
        let registry = registry_with_services(64);
        for i in 0..64 {
            registry.get_service(&format!("svc-{i}")).unwrap();
        }
        b.iter(|| {
            black_box(registry.get_service("svc-31").unwrap());
        });
    });

    group.finish();
}

fn bench_lazy_handle(c: &mut Criterion) {
    let mut group = c.benchmark_group("lazy_handle");
    group.throughput(Throughput::Elements(1));
    group.bench_function("handle_get_hot", |b| {
        let registry = registry_with_services(1);
        let handle = registry.lazy_handle("svc-0");
        handle.get().unwrap();
        b.iter(|| {
            black_box(handle.get().unwrap());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_registration, bench_resolution, bench_lazy_handle);
criterion_main!(benches);
