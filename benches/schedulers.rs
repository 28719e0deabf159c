use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use bracken::config::Config;
use bracken::generator::ChainGenerator;
use bracken::optimizer::{BlockOptimizer, BranchAndBoundOptimizer, OptimizerParams};
use bracken::scheduler::{
    BranchAndBoundScheduler, DeviceScheduler, PriorityListScheduler, Scheduler,
};
use bracken::sequence::Sequence;
use bracken::timer::Timer;

fn leaf_for(length: usize) -> Sequence {
    let config = Config {
        lengths: vec![length],
        size_range: (1, 4),
        dag_size_range: (8, 32),
        seed: 1,
        ..Config::default()
    };
    let chain = ChainGenerator::from_config(&config)
        .next_chain()
        .expect("one chain");
    let params = OptimizerParams {
        machines: 4,
        matrix_free: false,
        time_to_solve: 0.0,
    };
    BlockOptimizer::new(&chain, params)
        .collect_sequences()
        .into_iter()
        .next()
        .expect("at least one bracketing")
}

fn bench_inner_schedulers(c: &mut Criterion) {
    let mut group = c.benchmark_group("inner_schedulers");
    for length in [4, 6, 8] {
        let leaf = leaf_for(length);

        group.bench_with_input(BenchmarkId::new("list", length), &leaf, |b, leaf| {
            b.iter(|| {
                let mut seq = leaf.clone();
                PriorityListScheduler.schedule(
                    black_box(&mut seq),
                    4,
                    usize::MAX,
                    &Timer::unbounded(),
                )
            })
        });

        group.bench_with_input(BenchmarkId::new("branch_and_bound", length), &leaf, |b, leaf| {
            b.iter(|| {
                let mut seq = leaf.clone();
                BranchAndBoundScheduler.schedule(
                    black_box(&mut seq),
                    4,
                    usize::MAX,
                    &Timer::unbounded(),
                )
            })
        });

        let device = DeviceScheduler::new();
        group.bench_with_input(BenchmarkId::new("device", length), &leaf, |b, leaf| {
            b.iter(|| {
                let mut seq = leaf.clone();
                device.schedule(black_box(&mut seq), 4, usize::MAX, &Timer::unbounded())
            })
        });
    }
    group.finish();
}

fn bench_outer_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("outer_search");
    group.sample_size(10);
    for length in [4, 5, 6] {
        let config = Config {
            lengths: vec![length],
            size_range: (1, 4),
            dag_size_range: (8, 32),
            seed: 1,
            ..Config::default()
        };
        let chain = ChainGenerator::from_config(&config)
            .next_chain()
            .expect("one chain");
        let params = OptimizerParams {
            machines: 2,
            matrix_free: false,
            time_to_solve: 0.0,
        };

        group.bench_with_input(
            BenchmarkId::new("bnb_with_list", length),
            &chain,
            |b, chain| {
                b.iter(|| {
                    BranchAndBoundOptimizer::new(black_box(chain), params)
                        .solve(&PriorityListScheduler)
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_inner_schedulers, bench_outer_search);
criterion_main!(benches);
