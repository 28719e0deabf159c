//! Outer branch & bound over elimination sequences.
//!
//! Walks the bracketing tree (accumulation subsets, then elimination
//! orders), scheduling every complete sequence in its own task and
//! keeping the best `(sequence, makespan)` pair found. The fixed
//! `upper_bound` (typically a dynamic programming result) only prunes;
//! improvements move the incumbent instead.

use tracing::debug;

use crate::chain::JacobianChain;
use crate::scheduler::Scheduler;
use crate::sequence::Sequence;
use crate::timer::Timer;

use super::{LeafSink, OptimizeOutcome, OptimizerParams, SharedState, Walker};

pub struct BranchAndBoundOptimizer<'c> {
    chain: &'c JacobianChain,
    params: OptimizerParams,
    upper_bound: usize,
    seed: Option<Sequence>,
}

impl<'c> BranchAndBoundOptimizer<'c> {
    pub fn new(chain: &'c JacobianChain, params: OptimizerParams) -> Self {
        BranchAndBoundOptimizer {
            chain,
            params,
            upper_bound: usize::MAX,
            seed: None,
        }
    }

    /// Fixed pruning bound; never overwritten during the search.
    pub fn set_upper_bound(&mut self, upper_bound: usize) {
        self.upper_bound = upper_bound;
    }

    /// Install a fully scheduled sequence as the starting incumbent, so
    /// even a timed-out search returns something no worse.
    pub fn seed_incumbent(&mut self, sequence: Sequence) {
        assert!(sequence.is_fully_scheduled(), "incumbent must carry a schedule");
        self.seed = Some(sequence);
    }

    pub fn solve(&self, scheduler: &dyn Scheduler) -> OptimizeOutcome {
        let timer = Timer::from_seconds(self.params.time_to_solve);
        let state = SharedState::new(
            self.upper_bound,
            self.chain.longest_possible_sequence(),
            self.seed.clone(),
        );

        let walker = Walker {
            params: self.params,
            template: self.chain,
            state: &state,
            timer: &timer,
            sink: LeafSink::Schedule(scheduler),
        };
        rayon::scope(|scope| walker.run(scope));

        let outcome = state.into_outcome(timer.expired());
        debug!(
            leafs = outcome.stats.leafs_visited,
            updated = outcome.stats.updated_makespan,
            pruned = outcome.stats.total_pruned(),
            makespan = outcome.makespan,
            timer_expired = outcome.timer_expired,
            "bracketing search finished"
        );
        outcome
    }
}
