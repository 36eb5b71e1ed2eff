use std::{hint::black_box, sync::Arc};

use counted::{Handle, upcast};
use criterion::{Criterion, criterion_group, criterion_main};

pub trait Sample: Send + Sync {
    fn sample(&self) -> u64;
}

pub struct Constant(u64);

impl Sample for Constant {
    fn sample(&self) -> u64 {
        self.0
    }
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("clone_drop/arc", |b| {
        let value = Arc::new(0u64);

        b.iter(|| {
            drop(black_box(value.clone()));
        });
    });

    c.bench_function("clone_drop/handle", |b| {
        let value = Handle::new(0u64);

        b.iter(|| {
            drop(black_box(value.clone()));
        });
    });

    c.bench_function("construct/arc", |b| {
        b.iter(|| black_box(Arc::new(Constant(1))));
    });

    c.bench_function("construct/handle", |b| {
        b.iter(|| black_box(Handle::new(Constant(1))));
    });

    c.bench_function("deref/arc", |b| {
        let value = Arc::new(Constant(3)) as Arc<dyn Sample>;

        b.iter(|| black_box(&value).sample());
    });

    c.bench_function("deref/handle", |b| {
        let value: Handle<dyn Sample> = upcast!(as dyn Sample, Handle::new(Constant(3)));

        b.iter(|| black_box(&value).sample());
    });

    c.bench_function("convert/upcast_downcast", |b| {
        let value = Handle::new(Constant(3));

        b.iter(|| {
            let view: Handle<dyn Sample> = upcast!(as dyn Sample, value);
            black_box(view.downcast::<Constant>())
        });
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
