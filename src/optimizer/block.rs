//! Batch-scheduling variant of the bracketing search.
//!
//! Walks the same tree as
//! [`BranchAndBoundOptimizer`](super::BranchAndBoundOptimizer) but buffers
//! finished sequences instead of scheduling them on the spot; the buffer
//! then goes to the scheduler as one batch. That trades upper-bound
//! feedback between leaves for a scheduling phase that can run entirely
//! on a device.

use std::sync::Mutex;

use tracing::debug;

use crate::chain::JacobianChain;
use crate::scheduler::Scheduler;
use crate::sequence::Sequence;
use crate::timer::Timer;

use super::{LeafSink, OptimizeOutcome, OptimizerParams, SharedState, Walker};

pub struct BlockOptimizer<'c> {
    chain: &'c JacobianChain,
    params: OptimizerParams,
    upper_bound: usize,
    seed: Option<Sequence>,
}

impl<'c> BlockOptimizer<'c> {
    pub fn new(chain: &'c JacobianChain, params: OptimizerParams) -> Self {
        BlockOptimizer {
            chain,
            params,
            upper_bound: usize::MAX,
            seed: None,
        }
    }

    pub fn set_upper_bound(&mut self, upper_bound: usize) {
        self.upper_bound = upper_bound;
    }

    pub fn seed_incumbent(&mut self, sequence: Sequence) {
        assert!(sequence.is_fully_scheduled(), "incumbent must carry a schedule");
        self.seed = Some(sequence);
    }

    /// Enumerate the finished elimination sequences this optimizer would
    /// schedule, without scheduling them. Exposed for inspection and for
    /// comparing schedulers on identical inputs.
    pub fn collect_sequences(&self) -> Vec<Sequence> {
        let timer = Timer::from_seconds(self.params.time_to_solve);
        let state = SharedState::new(
            self.upper_bound,
            self.chain.longest_possible_sequence(),
            self.seed.clone(),
        );
        let buffer = Mutex::new(Vec::new());

        let walker = Walker {
            params: self.params,
            template: self.chain,
            state: &state,
            timer: &timer,
            sink: LeafSink::Collect(&buffer),
        };
        rayon::scope(|scope| walker.run(scope));

        buffer.into_inner().expect("leaf buffer lock")
    }

    pub fn solve(&self, scheduler: &dyn Scheduler) -> OptimizeOutcome {
        let timer = Timer::from_seconds(self.params.time_to_solve);
        let state = SharedState::new(
            self.upper_bound,
            self.chain.longest_possible_sequence(),
            self.seed.clone(),
        );
        let buffer = Mutex::new(Vec::new());

        let walker = Walker {
            params: self.params,
            template: self.chain,
            state: &state,
            timer: &timer,
            sink: LeafSink::Collect(&buffer),
        };
        rayon::scope(|scope| walker.run(scope));

        let mut sequences = buffer.into_inner().expect("leaf buffer lock");
        debug!(collected = sequences.len(), "dispatching sequence batch");

        if !timer.expired() && !sequences.is_empty() {
            let batch = scheduler.schedule_batch(
                &mut sequences,
                self.params.machines,
                state.current_best(),
                &timer,
            );
            if !batch.finished {
                state.note_timeout();
            }
            if let Some(index) = batch.best_index {
                state.offer(sequences.swap_remove(index), batch.best_makespan);
            }
        }

        state.into_outcome(timer.expired())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Jacobian;
    use crate::optimizer::BranchAndBoundOptimizer;
    use crate::scheduler::BranchAndBoundScheduler;

    fn unit_chain(edges: &[usize]) -> JacobianChain {
        let elementals: Vec<Jacobian> = edges
            .iter()
            .map(|&e| Jacobian {
                m: 1,
                n: 1,
                edges_in_dag: e,
                ..Jacobian::default()
            })
            .collect();
        JacobianChain::from_elementals(&elementals, 0)
    }

    #[test]
    fn collects_every_bracketing_of_a_short_chain() {
        let chain = unit_chain(&[1, 1, 1]);
        let params = OptimizerParams {
            machines: 1,
            matrix_free: false,
            time_to_solve: 0.0,
        };
        let sequences = BlockOptimizer::new(&chain, params).collect_sequences();
        // Two bracketings of a three-block product, canonical op order.
        assert_eq!(sequences.len(), 2);
        for seq in &sequences {
            assert_eq!(seq.len(), 5);
            assert_eq!(seq.count_accumulations(), 3);
        }
    }

    #[test]
    fn batch_solve_matches_immediate_solve() {
        let chain = unit_chain(&[2, 3, 1]);
        let params = OptimizerParams {
            machines: 2,
            matrix_free: false,
            time_to_solve: 0.0,
        };
        let immediate =
            BranchAndBoundOptimizer::new(&chain, params).solve(&BranchAndBoundScheduler);
        let batched = BlockOptimizer::new(&chain, params).solve(&BranchAndBoundScheduler);
        assert_eq!(immediate.makespan, batched.makespan);
    }
}
