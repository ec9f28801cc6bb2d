use aesearch_ml::arch::{ArchitectureDescriptor, InputDim, handcrafted_encoding};
use aesearch_ml::nn::{ConvAutoencoder, ops};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ndarray::Array4;

fn bench_forward(c: &mut Criterion) {
    let input = InputDim::new(1, 32, 32);
    for index in [0, 1] {
        let Some(encoding) = handcrafted_encoding(index, input.channels) else {
            continue;
        };
        let arch = ArchitectureDescriptor::mirrored(input, 16, encoding)
            .expect("handcrafted template fits 32x32");
        let model = ConvAutoencoder::new(arch, 0);
        let x = Array4::from_elem((4, 1, 32, 32), 0.5f32);

        c.bench_function(&format!("forward_handcrafted_{index}_32x32_batch4"), |b| {
            b.iter(|| model.forward(black_box(&x)).expect("forward"))
        });
    }
}

fn bench_kernels(c: &mut Criterion) {
    let x = Array4::from_shape_fn((4, 16, 32, 32), |(n, ch, y, x)| {
        ((n + ch + y * 3 + x * 7) % 11) as f32 / 11.0
    });

    c.bench_function("max_pool2d_16x32x32", |b| {
        b.iter(|| ops::max_pool2d(black_box(&x), 2, 2, 0).expect("pool"))
    });

    let (pooled, indices) = ops::max_pool2d(&x, 2, 2, 0).expect("pool");
    c.bench_function("max_unpool2d_16x16x16", |b| {
        b.iter(|| {
            ops::max_unpool2d(
                black_box(&pooled),
                &indices,
                aesearch_ml::arch::SpatialDim::new(32, 32),
            )
            .expect("unpool")
        })
    });
}

criterion_group!(benches, bench_forward, bench_kernels);
criterion_main!(benches);
