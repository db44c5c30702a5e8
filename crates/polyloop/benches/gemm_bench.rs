//! Criterion benchmarks for the schedule + cost pipeline.
//! Focus sizes: square GEMM extents in {64, 512, 8192}.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use nalgebra::{dmatrix, DMatrix, DVector};
use rand::{rngs::StdRng, Rng, SeedableRng};

use polyloop::api::{
    optimize_tree, AffineLoop, ArrayId, Inst, LoopBlock, LoopTreeSchedule, Machine, MemAccess, Op,
};

fn gemm_block(extent: i64) -> LoopBlock {
    let nest = AffineLoop::rect(&[extent, extent, extent]);
    let insts = vec![
        Inst::Load { mem: 0 },
        Inst::Load { mem: 1 },
        Inst::Load { mem: 2 },
        Inst::Compute {
            op: Op::Fma,
            operands: vec![0, 1, 2],
        },
        Inst::Store { mem: 3, value: 3 },
    ];
    let acc = |array: usize, index: DMatrix<i64>, fus: Vec<i64>, st: bool, inst: usize| MemAccess {
        array: ArrayId(array),
        loop_nest: nest.clone(),
        index,
        offset: DVector::zeros(2),
        sym_offset: DMatrix::zeros(2, 0),
        fusion_omega: fus,
        is_store: st,
        elem_bytes: 8,
        inst,
    };
    let memory = vec![
        acc(1, dmatrix![1i64, 0, 0; 0, 0, 1], vec![0, 0, 0, 0], false, 0),
        acc(2, dmatrix![0i64, 0, 1; 0, 1, 0], vec![0, 0, 0, 1], false, 1),
        acc(0, dmatrix![1i64, 0, 0; 0, 1, 0], vec![0, 0, 0, 2], false, 2),
        acc(0, dmatrix![1i64, 0, 0; 0, 1, 0], vec![0, 0, 0, 3], true, 4),
    ];
    LoopBlock::new(memory, insts)
}

fn bench_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule");
    for &ext in &[64i64, 512, 8192] {
        group.bench_with_input(BenchmarkId::new("gemm", ext), &ext, |b, &ext| {
            b.iter_batched(
                || gemm_block(ext),
                |mut lb| {
                    let _sat = lb.optimize();
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_full_pipeline(c: &mut Criterion) {
    let machine = Machine::skylake_server();
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    for &ext in &[64i64, 512] {
        group.bench_with_input(BenchmarkId::new("gemm", ext), &ext, |b, &ext| {
            b.iter_batched(
                || {
                    let mut lb = gemm_block(ext);
                    lb.optimize().expect("schedulable");
                    let lts = LoopTreeSchedule::init(&lb);
                    (lb, lts)
                },
                |(lb, lts)| optimize_tree(&machine, &lb, &lts),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_simplex(c: &mut Criterion) {
    // Random feasible systems keep the LP kernel honest.
    let mut group = c.benchmark_group("simplex");
    for &n in &[4usize, 8, 16] {
        group.bench_with_input(BenchmarkId::new("lex_min", n), &n, |b, &n| {
            b.iter_batched(
                || {
                    let mut rng = StdRng::seed_from_u64(7);
                    let mut m = DMatrix::<i64>::zeros(n, 2 * n + 1);
                    for i in 0..n {
                        m[(i, 0)] = rng.gen_range(0..16);
                        for j in 0..n {
                            m[(i, 1 + j)] = rng.gen_range(-3..=3i64);
                        }
                        m[(i, 1 + n + i)] = 1;
                    }
                    polyloop::math::Simplex::new(m)
                },
                |s| s.lex_minimize(0),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_schedule, bench_full_pipeline, bench_simplex);
criterion_main!(benches);
