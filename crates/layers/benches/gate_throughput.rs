use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layers::gate::ContextGate;

fn bench_gate(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 4usize;
    let shapes = &[(128usize, 256usize), (512, 512), (2048, 1024)];
    let dtypes = &[DType::BF16, DType::F32];

    for &dtype in dtypes {
        let mut group = c.benchmark_group(format!("context_gate/{dtype:?}"));
        for &(seq, hidden) in shapes {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, dtype, &device);
            let gate = ContextGate::new(hidden, vb.pp("w1"), vb.pp("w2")).expect("gate init");
            let input = Tensor::randn(0f32, 1.0, (batch, seq, hidden), &device)
                .expect("input")
                .to_dtype(dtype)
                .expect("cast input");
            let context = Tensor::randn(0f32, 1.0, (batch, seq, hidden), &device)
                .expect("context")
                .to_dtype(dtype)
                .expect("cast context");
            group.throughput(Throughput::Elements((batch * seq * hidden) as u64));
            group.bench_with_input(
                BenchmarkId::from_parameter(format!("{seq}x{hidden}")),
                &(gate, input, context),
                |b, (gate, input, context)| {
                    b.iter(|| {
                        let out = gate.apply(black_box(input), black_box(context)).expect("apply");
                        black_box(out);
                    });
                },
            );
        }
        group.finish();
    }
}

criterion_group!(benches, bench_gate);
criterion_main!(benches);
