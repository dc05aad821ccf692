use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use stencil_opt::bbox::BoundingBox;
use stencil_opt::inline::inline_function;
use stencil_opt::ir::{BinaryOp, BodyBuilder, ElemType, Function, Operand};
use stencil_opt::pipeline::{run_pipeline, PipelineOptions};
use stencil_opt::resolve::load_module;
use stencil_opt::shape_infer::infer_shapes;
use stencil_opt::unroll::{unroll_function, UnrollOptions};

// Optimizer benchmark scenarios: long chains stress the shape worklist and
// repeated inlining; wide bodies stress replication.

/// `in -> r0 -> r1 -> ... -> r{n-1}`; every region reads its source at
/// offsets 0 and 1, so region `k` needs `k` extra points at the upper end.
fn chain(n: usize) -> Function {
    let mut f = Function::new("chain", 1);
    let input = f.add_buffer("in", ElemType::F64, None);
    let mut source = Operand::Buffer(input);
    let mut last = None;
    for i in 0..n {
        let mut b = BodyBuilder::new();
        let x = b.access(0, &[0]);
        let y = b.access(0, &[1]);
        let s = b.binary(BinaryOp::Add, x, y);
        let name = format!("t{i}");
        let (_, t) = f.add_apply(format!("r{i}"), vec![source], b.finish(&[s]), &[(name.as_str(), ElemType::F64)]);
        source = Operand::Temp(t[0]);
        last = Some(t[0]);
    }
    if let Some(t) = last {
        f.mark_output(t, BoundingBox::from_ranges(&[(0, 1024)]));
    }
    f
}

/// A single 2D region with a `(2r+1)^2` box stencil.
fn box_stencil(radius: i64) -> Function {
    let mut f = Function::new("box", 2);
    let input = f.add_buffer("in", ElemType::F64, None);
    let mut b = BodyBuilder::new();
    let mut acc = b.constant(0.0);
    for dx in -radius..=radius {
        for dy in -radius..=radius {
            let v = b.access(0, &[dx, dy]);
            acc = b.binary(BinaryOp::Add, acc, v);
        }
    }
    let (_, t) = f.add_apply("blur", vec![Operand::Buffer(input)], b.finish(&[acc]), &[("out", ElemType::F64)]);
    f.mark_output(t[0], BoundingBox::from_ranges(&[(0, 256), (0, 256)]));
    f
}

const LAPLACE: &str = "
    func laplace rank 2 {
      buffer @phi : f64
      %lap = apply r_lap(@phi) -> f64 {
        %0 = access @phi [0, 0]
        %1 = access @phi [-1, 0]
        %2 = access @phi [1, 0]
        %3 = access @phi [0, -1]
        %4 = access @phi [0, 1]
        %5 = add %1, %2
        %6 = add %3, %4
        %7 = add %5, %6
        %8 = const 4.0
        %9 = mul %0, %8
        %10 = sub %7, %9
        return %10
      }
      %out = apply r_smooth(%lap) -> f64 {
        %0 = access %lap [0, 0]
        %1 = const 0.25
        %2 = mul %0, %1
        return %2
      }
      output %out [0:64, 0:64]
    }";

// Shape inference scaling vs chain length.
fn bench_shape_inference(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/shape_inference");
    for n in [10_usize, 100, 1000] {
        let func = chain(n);
        group.bench_with_input(BenchmarkId::from_parameter(format!("chain{n}")), &func, |b, func| {
            b.iter_batched(
                || func.clone(),
                |mut f| {
                    let r = infer_shapes(black_box(&mut f)).unwrap();
                    black_box(r.stats);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

// Inlining a whole chain into its last region.
fn bench_inlining(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/inlining");
    for n in [10_usize, 50, 200] {
        let mut func = chain(n);
        infer_shapes(&mut func).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(format!("chain{n}")), &func, |b, func| {
            b.iter_batched(
                || func.clone(),
                |mut f| {
                    let r = inline_function(black_box(&mut f)).unwrap();
                    black_box(r.inlined.len());
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

// Unrolling a wide body by increasing factors.
fn bench_unrolling(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/unrolling");
    let mut func = box_stencil(3);
    infer_shapes(&mut func).unwrap();
    for factor in [2_u32, 4, 8] {
        let opts = UnrollOptions {
            factor,
            ..UnrollOptions::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(format!("x{factor}")), &opts, |b, opts| {
            b.iter_batched(
                || func.clone(),
                |mut f| {
                    let r = unroll_function(black_box(&mut f), opts).unwrap();
                    black_box(r.unrolled.len());
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

// Text → optimized module, end to end.
fn bench_full_pipeline(c: &mut Criterion) {
    let options = PipelineOptions::default();
    c.bench_function("kpi/full_pipeline/laplace", |b| {
        b.iter(|| {
            let mut module = load_module(black_box(LAPLACE)).unwrap();
            let report = run_pipeline(&mut module, &options, |_, _, _| {});
            black_box(report.all_succeeded());
        });
    });
}

criterion_group!(
    benches,
    bench_shape_inference,
    bench_inlining,
    bench_unrolling,
    bench_full_pipeline,
);
criterion_main!(benches);
