//! Scheduler scenarios: the two inner schedulers on hand-built and
//! generated sequences.

use bracken::chain::{Jacobian, JacobianChain};
use bracken::operation::{Mode, Operation};
use bracken::optimizer::{BlockOptimizer, OptimizerParams};
use bracken::scheduler::{BranchAndBoundScheduler, PriorityListScheduler, Scheduler};
use bracken::sequence::Sequence;
use bracken::timer::Timer;

fn chain_of(dims: &[(usize, usize, usize)]) -> JacobianChain {
    let elementals: Vec<Jacobian> = dims
        .iter()
        .map(|&(m, n, edges_in_dag)| Jacobian {
            m,
            n,
            edges_in_dag,
            ..Jacobian::default()
        })
        .collect();
    JacobianChain::from_elementals(&elementals, 0)
}

/// Every precedence pair is ordered in time and no machine runs two
/// operations at once.
fn assert_valid_schedule(seq: &Sequence) {
    assert!(seq.is_fully_scheduled());
    for a in 0..seq.len() {
        for b in 0..seq.len() {
            if seq[a].depends_on(&seq[b]) {
                assert!(
                    seq[b].end_time() <= seq[a].start_time,
                    "operation {a} starts before its input {b} finishes"
                );
            }
            if a != b && seq[a].thread == seq[b].thread {
                let disjoint = seq[a].end_time() <= seq[b].start_time
                    || seq[b].end_time() <= seq[a].start_time;
                assert!(disjoint, "operations {a} and {b} overlap on one machine");
            }
        }
    }
}

// ── S1: two-block chain ────────────────────────────────────────────

/// acc(0) = 36 (tangent), acc(1) = 36 (adjoint), multiplication = 12.
fn two_block_sequence() -> Sequence {
    Sequence::from_iter([
        Operation::accumulation(Mode::Tangent, 0, 36),
        Operation::accumulation(Mode::Adjoint, 1, 36),
        Operation::multiplication(1, 0, 0, 12),
    ])
}

#[test]
fn s1_two_blocks_one_machine() {
    let mut seq = two_block_sequence();
    let outcome = BranchAndBoundScheduler.schedule(&mut seq, 1, usize::MAX, &Timer::unbounded());
    assert_eq!(outcome.makespan, 84);
    assert_valid_schedule(&seq);
}

#[test]
fn s1_two_blocks_two_machines() {
    let mut seq = two_block_sequence();
    let outcome = BranchAndBoundScheduler.schedule(&mut seq, 2, usize::MAX, &Timer::unbounded());
    assert_eq!(outcome.makespan, 48);
    assert_valid_schedule(&seq);
    assert_ne!(seq[0].thread, seq[1].thread);
}

// ── S2: unit chain of three ────────────────────────────────────────

fn unit_three_sequence() -> Sequence {
    Sequence::from_iter([
        Operation::accumulation(Mode::Tangent, 0, 1),
        Operation::accumulation(Mode::Tangent, 1, 1),
        Operation::accumulation(Mode::Tangent, 2, 1),
        Operation::multiplication(1, 0, 0, 1),
        Operation::multiplication(2, 1, 0, 1),
    ])
}

#[test]
fn s2_unit_chain_one_machine() {
    let mut seq = unit_three_sequence();
    let outcome = BranchAndBoundScheduler.schedule(&mut seq, 1, usize::MAX, &Timer::unbounded());
    assert_eq!(outcome.makespan, 5);
}

#[test]
fn s2_unit_chain_two_machines() {
    let mut seq = unit_three_sequence();
    let outcome = BranchAndBoundScheduler.schedule(&mut seq, 2, usize::MAX, &Timer::unbounded());
    assert_eq!(outcome.makespan, 3);
    assert_valid_schedule(&seq);
}

// ── S3: greedy list scheduling is suboptimal ───────────────────────

/// Two cheap accumulations feed a multiplication; a third, expensive
/// accumulation joins at the root. The level heuristic insists on
/// starting both cheap accumulations first, which strands the expensive
/// one behind them.
fn list_trap_sequence() -> Sequence {
    Sequence::from_iter([
        Operation::accumulation(Mode::Tangent, 0, 8),
        Operation::accumulation(Mode::Tangent, 1, 8),
        Operation::accumulation(Mode::Tangent, 2, 11),
        Operation::multiplication(1, 0, 0, 2),
        Operation::multiplication(2, 1, 0, 2),
    ])
}

#[test]
fn s3_branch_and_bound_beats_the_list() {
    let mut list_seq = list_trap_sequence();
    let list = PriorityListScheduler.schedule(&mut list_seq, 2, usize::MAX, &Timer::unbounded());
    assert_eq!(list.makespan, 21);
    assert_valid_schedule(&list_seq);

    let mut bnb_seq = list_trap_sequence();
    let bnb = BranchAndBoundScheduler.schedule(&mut bnb_seq, 2, usize::MAX, &Timer::unbounded());
    assert_eq!(bnb.makespan, 20);
    assert_valid_schedule(&bnb_seq);

    assert!(bnb.makespan < list.makespan);
}

// ── S6: machine labels are interchangeable ─────────────────────────

#[test]
fn s6_makespan_is_invariant_under_machine_relabeling() {
    let mut seq = list_trap_sequence();
    BranchAndBoundScheduler.schedule(&mut seq, 2, usize::MAX, &Timer::unbounded());
    let before = seq.makespan();

    for idx in 0..seq.len() {
        seq[idx].thread = 1 - seq[idx].thread;
    }
    assert_eq!(seq.makespan(), before);
    assert_valid_schedule(&seq);
}

// ── Properties over generated sequences ────────────────────────────

fn generated_leaves(dims: &[(usize, usize, usize)], machines: usize) -> Vec<Sequence> {
    let chain = chain_of(dims);
    let params = OptimizerParams {
        machines,
        matrix_free: false,
        time_to_solve: 0.0,
    };
    BlockOptimizer::new(&chain, params).collect_sequences()
}

#[test]
fn branch_and_bound_never_loses_to_the_list() {
    let dims = [(2, 3, 7), (1, 2, 12), (3, 1, 4), (2, 3, 9)];
    for machines in 1..=3 {
        for leaf in generated_leaves(&dims, machines) {
            let mut list_seq = leaf.clone();
            let list =
                PriorityListScheduler.schedule(&mut list_seq, machines, usize::MAX, &Timer::unbounded());

            let mut bnb_seq = leaf;
            let bnb = BranchAndBoundScheduler.schedule(
                &mut bnb_seq,
                machines,
                list.makespan,
                &Timer::unbounded(),
            );

            assert!(
                bnb.makespan <= list.makespan,
                "B&B {} worse than list {} on {} machines",
                bnb.makespan,
                list.makespan,
                machines
            );
        }
    }
}

#[test]
fn schedules_are_consistent_and_bounded_below_by_the_critical_path() {
    let dims = [(1, 2, 5), (2, 1, 8), (1, 2, 3)];
    for machines in 1..=3 {
        for mut leaf in generated_leaves(&dims, machines) {
            let outcome = BranchAndBoundScheduler.schedule(
                &mut leaf,
                machines,
                usize::MAX,
                &Timer::unbounded(),
            );
            assert_valid_schedule(&leaf);
            assert_eq!(leaf.makespan(), outcome.makespan);

            let mut unscheduled = leaf.clone();
            unscheduled.reset_schedule();
            assert!(unscheduled.critical_path() <= leaf.makespan());
            // With a schedule in place the critical path still never
            // exceeds the makespan.
            assert!(leaf.critical_path() <= leaf.makespan());
        }
    }
}
