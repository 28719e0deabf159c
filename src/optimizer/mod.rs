//! Bracketing optimizers: search the space of elimination sequences.
//!
//! The two branch & bound variants share everything except their leaf
//! policy, so the subset enumeration, the elimination DFS, candidate
//! generation and the shared search state live here. The dynamic
//! programming solver is independent and only exists to seed upper
//! bounds.

pub mod block;
pub mod branch_and_bound;
pub mod dynamic_programming;

pub use block::BlockOptimizer;
pub use branch_and_bound::BranchAndBoundOptimizer;
pub use dynamic_programming::DynamicProgrammingOptimizer;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use rayon::Scope;

use crate::chain::JacobianChain;
use crate::config::Config;
use crate::operation::{Mode, Operation};
use crate::scheduler::Scheduler;
use crate::sequence::Sequence;
use crate::timer::Timer;

/// Solver policy shared by the optimizers.
#[derive(Clone, Copy, Debug)]
pub struct OptimizerParams {
    /// Machines handed to the inner schedulers; 0 means unbounded.
    pub machines: usize,
    /// Allow matrix-free tangent/adjoint eliminations.
    pub matrix_free: bool,
    /// Wall-clock budget in seconds; 0 means unbounded.
    pub time_to_solve: f64,
}

impl OptimizerParams {
    pub fn from_config(config: &Config) -> Self {
        OptimizerParams {
            machines: config.available_threads,
            matrix_free: config.matrix_free,
            time_to_solve: config.time_to_solve,
        }
    }
}

/// Candidate operations opened up by one applied operation: the rightward
/// extension and the leftward extension of the block it produced.
pub(crate) type CandidatePair = [Option<Operation>; 2];

/// Cheapest way to accumulate the elemental block `(j, j)`: tangent by
/// default, adjoint when it is cheaper and its tape fits the chain's
/// memory limit.
pub(crate) fn cheapest_accumulation(chain: &JacobianChain, j: usize) -> Operation {
    let jac = chain.jacobian(j, j);
    let tangent = jac.accumulation_fma(Mode::Tangent);
    let mut op = Operation::accumulation(Mode::Tangent, j, tangent);

    let memory = chain.memory_limit();
    if memory == 0 || memory >= jac.edges_in_dag {
        let adjoint = jac.accumulation_fma(Mode::Adjoint);
        if adjoint < tangent {
            op = Operation::accumulation(Mode::Adjoint, j, adjoint);
        }
    }
    op
}

/// Extensions enabled by the freshly accumulated block `(op_j, op_i)`.
///
/// Each side holds at most one operation: a multiplication with the
/// adjacent accumulated block when one is live, otherwise (in matrix-free
/// mode) an elimination through the adjacent elemental DAG. Unused
/// accumulated blocks are pairwise disjoint, so the adjacency scan finds
/// at most one partner.
pub(crate) fn extension_candidates(
    chain: &JacobianChain,
    params: &OptimizerParams,
    op_j: usize,
    op_i: usize,
) -> CandidatePair {
    let mut pair: CandidatePair = [None, None];
    let length = chain.length();

    // Rightward: combine with a block ending just above op_j, or push
    // tangents through the DAG of F'_{op_j + 1}.
    if op_j + 1 < length {
        let (k, i) = (op_j, op_i);
        let ki = chain.jacobian(k, i);

        for j in (k + 1..length).rev() {
            let jk = chain.jacobian(j, k + 1);
            if jk.is_accumulated && !jk.is_used {
                pair[0] = Some(Operation::multiplication(j, k, i, jk.m * ki.m * ki.n));
                break;
            }
        }
        if pair[0].is_none() && params.matrix_free {
            let elemental = chain.jacobian(k + 1, k + 1);
            debug_assert!(!elemental.is_accumulated && !elemental.is_used);
            pair[0] = Some(Operation::elimination(
                Mode::Tangent,
                k + 1,
                k,
                i,
                elemental.propagation_fma(Mode::Tangent, ki.n),
            ));
        }
    }

    // Leftward: combine with a block ending just below op_i, or pull
    // adjoints through the DAG of F'_{op_i - 1}.
    if op_i > 0 {
        let (j, k) = (op_j, op_i - 1);
        let jk = chain.jacobian(j, k + 1);

        for i in 0..=k {
            let ki = chain.jacobian(k, i);
            if ki.is_accumulated && !ki.is_used {
                pair[1] = Some(Operation::multiplication(j, k, i, jk.m * ki.m * ki.n));
                break;
            }
        }
        if pair[1].is_none() && params.matrix_free {
            let elemental = chain.jacobian(k, k);
            debug_assert!(!elemental.is_accumulated && !elemental.is_used);
            let memory = chain.memory_limit();
            if memory == 0 || memory >= elemental.edges_in_dag {
                pair[1] = Some(Operation::elimination(
                    Mode::Adjoint,
                    j,
                    k,
                    k,
                    elemental.propagation_fma(Mode::Adjoint, jk.m),
                ));
            }
        }
    }

    pair
}

/// Search counters reported alongside the result.
#[derive(Clone, Debug, Default)]
pub struct SearchStats {
    /// Complete sequences handed to a scheduler.
    pub leafs_visited: usize,
    /// Incumbent improvements.
    pub updated_makespan: usize,
    /// Branches cut by the critical-path bound, indexed by sequence
    /// length at the cut.
    pub pruned_branches: Vec<usize>,
}

impl SearchStats {
    pub fn total_pruned(&self) -> usize {
        self.pruned_branches.iter().sum()
    }
}

impl fmt::Display for SearchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Leafs visited (= sequences scheduled): {}",
            self.leafs_visited
        )?;
        writeln!(f, "Updated makespan: {}", self.updated_makespan)?;
        writeln!(f, "Pruned branches: {}", self.total_pruned())?;
        writeln!(f, "Pruned branches per sequence length:")?;
        write!(f, "[ ")?;
        for pruned in &self.pruned_branches {
            write!(f, "{pruned} ")?;
        }
        write!(f, "]")
    }
}

/// Result of one optimizer run.
#[derive(Clone, Debug)]
pub struct OptimizeOutcome {
    /// Best sequence found, fully scheduled. `None` when the search was
    /// cut before any leaf was scheduled and no incumbent was seeded.
    pub sequence: Option<Sequence>,
    /// Makespan of `sequence`, `usize::MAX` when there is none.
    pub makespan: usize,
    pub stats: SearchStats,
    /// The deadline cut the search somewhere; the result may be
    /// suboptimal.
    pub timer_expired: bool,
}

struct Incumbent {
    sequence: Option<Sequence>,
    makespan: usize,
}

/// State shared by every task of one optimizer run.
///
/// The `(sequence, makespan)` incumbent pair only changes under the
/// mutex; `best_makespan` mirrors the makespan for the lock-free bound
/// reads on the hot path. `upper_bound` is fixed at start and never
/// overwritten by improvements.
pub(crate) struct SharedState {
    incumbent: Mutex<Incumbent>,
    best_makespan: AtomicUsize,
    upper_bound: usize,
    leafs: AtomicUsize,
    updated: AtomicUsize,
    pruned: Vec<AtomicUsize>,
    timer_expired: AtomicBool,
}

impl SharedState {
    pub(crate) fn new(upper_bound: usize, max_depth: usize, seed: Option<Sequence>) -> Self {
        let makespan = seed.as_ref().map_or(usize::MAX, Sequence::makespan);
        let mut pruned = Vec::new();
        pruned.resize_with(max_depth + 1, AtomicUsize::default);
        SharedState {
            incumbent: Mutex::new(Incumbent {
                sequence: seed,
                makespan,
            }),
            best_makespan: AtomicUsize::new(makespan),
            upper_bound,
            leafs: AtomicUsize::new(0),
            updated: AtomicUsize::new(0),
            pruned,
            timer_expired: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn current_best(&self) -> usize {
        self.best_makespan.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn upper_bound(&self) -> usize {
        self.upper_bound
    }

    pub(crate) fn note_leaf(&self) {
        self.leafs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_prune(&self, depth: usize) {
        self.pruned[depth].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_timeout(&self) {
        self.timer_expired.store(true, Ordering::Relaxed);
    }

    /// Install `sequence` as the incumbent if it is strictly better.
    pub(crate) fn offer(&self, sequence: Sequence, makespan: usize) {
        let mut incumbent = self.incumbent.lock().expect("incumbent lock");
        if makespan < incumbent.makespan {
            incumbent.sequence = Some(sequence);
            incumbent.makespan = makespan;
            self.best_makespan.store(makespan, Ordering::Relaxed);
            self.updated.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn into_outcome(self, timer_expired: bool) -> OptimizeOutcome {
        let incumbent = self.incumbent.into_inner().expect("incumbent lock");
        OptimizeOutcome {
            sequence: incumbent.sequence,
            makespan: incumbent.makespan,
            stats: SearchStats {
                leafs_visited: self.leafs.into_inner(),
                updated_makespan: self.updated.into_inner(),
                pruned_branches: self.pruned.into_iter().map(AtomicUsize::into_inner).collect(),
            },
            timer_expired: timer_expired || self.timer_expired.into_inner(),
        }
    }
}

/// What to do with a finished elimination sequence.
pub(crate) enum LeafSink<'s> {
    /// Schedule it right away in its own task and offer the result as an
    /// incumbent.
    Schedule(&'s dyn Scheduler),
    /// Buffer it for one batched scheduling pass at the end.
    Collect(&'s Mutex<Vec<Sequence>>),
}

/// Shared DFS over bracketings: accumulation subsets first, then the
/// elimination phase, leaves handed to the sink.
pub(crate) struct Walker<'s> {
    pub params: OptimizerParams,
    pub template: &'s JacobianChain,
    pub state: &'s SharedState,
    pub timer: &'s Timer,
    pub sink: LeafSink<'s>,
}

impl<'s> Walker<'s> {
    /// Walk every accumulation subset: all sizes in matrix-free mode,
    /// exactly the full set otherwise.
    pub(crate) fn run(&'s self, scope: &Scope<'s>) {
        let length = self.template.length();
        let first = if self.params.matrix_free { 1 } else { length };

        for accs in first..=length {
            let mut sequence = Sequence::new();
            let mut chain = self.template.clone();
            let mut candidates = Vec::new();
            self.grow_accumulations(scope, &mut sequence, &mut chain, accs, &mut candidates, 0);
        }
    }

    fn grow_accumulations(
        &'s self,
        scope: &Scope<'s>,
        sequence: &mut Sequence,
        chain: &mut JacobianChain,
        accs: usize,
        candidates: &mut Vec<CandidatePair>,
        from: usize,
    ) {
        if accs == 0 {
            // Subset complete: the elimination phase runs as its own task
            // on private copies.
            let mut task_sequence = sequence.clone();
            let mut task_chain = chain.clone();
            let mut task_candidates = candidates.clone();
            scope.spawn(move |scope| {
                self.grow_eliminations(
                    scope,
                    &mut task_sequence,
                    &mut task_chain,
                    &mut task_candidates,
                    0,
                );
            });
            return;
        }

        for j in from..self.template.length() {
            let op = cheapest_accumulation(chain, j);
            if !chain.apply(&op) {
                continue;
            }
            candidates.push(extension_candidates(chain, &self.params, op.j, op.i));
            sequence.push(op);

            self.grow_accumulations(scope, sequence, chain, accs - 1, candidates, j + 1);

            sequence.pop();
            candidates.pop();
            chain.revert(&op);
        }
    }

    fn grow_eliminations(
        &'s self,
        scope: &Scope<'s>,
        sequence: &mut Sequence,
        chain: &mut JacobianChain,
        candidates: &mut Vec<CandidatePair>,
        from: usize,
    ) {
        if self.timer.expired() {
            self.state.note_timeout();
            return;
        }

        if chain.is_complete() {
            debug_assert!(matches!(candidates.last(), Some([None, None])));
            self.visit_leaf(scope, sequence.clone());
            return;
        }

        let lower_bound = sequence.critical_path();
        if lower_bound >= self.state.current_best() || lower_bound > self.state.upper_bound() {
            self.state.note_prune(sequence.len());
            return;
        }

        // Only candidates at or past `from` are considered, which fixes a
        // canonical order for the ops of a sequence and keeps permutations
        // of one bracketing from being revisited.
        for idx in from..candidates.len() {
            for side in 0..2 {
                let Some(op) = candidates[idx][side] else {
                    continue;
                };
                if !chain.apply(&op) {
                    continue;
                }
                candidates.push(extension_candidates(chain, &self.params, op.j, op.i));
                sequence.push(op);

                self.grow_eliminations(scope, sequence, chain, candidates, idx + 1);

                sequence.pop();
                candidates.pop();
                chain.revert(&op);
            }
        }
    }

    fn visit_leaf(&'s self, scope: &Scope<'s>, leaf: Sequence) {
        match self.sink {
            LeafSink::Schedule(scheduler) => {
                scope.spawn(move |_| {
                    if self.timer.expired() {
                        self.state.note_timeout();
                        return;
                    }
                    let mut leaf = leaf;
                    let bound = self.state.current_best();
                    let outcome =
                        scheduler.schedule(&mut leaf, self.params.machines, bound, self.timer);
                    if !outcome.finished {
                        self.state.note_timeout();
                    }
                    self.state.note_leaf();
                    if outcome.makespan < bound {
                        self.state.offer(leaf, outcome.makespan);
                    }
                });
            }
            LeafSink::Collect(buffer) => {
                self.state.note_leaf();
                buffer.lock().expect("leaf buffer lock").push(leaf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Jacobian;

    fn chain_with_dims(dims: &[(usize, usize, usize)]) -> JacobianChain {
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

    #[test]
    fn cheapest_accumulation_picks_the_smaller_mode() {
        // (m, n) = (2, 3): tangent 3·18 = 54, adjoint 2·18 = 36.
        let chain = chain_with_dims(&[(2, 3, 18)]);
        let op = cheapest_accumulation(&chain, 0);
        assert_eq!(op.mode, Mode::Adjoint);
        assert_eq!(op.fma, 36);
    }

    #[test]
    fn cheapest_accumulation_respects_memory() {
        let elementals = [Jacobian {
            m: 2,
            n: 3,
            edges_in_dag: 18,
            ..Jacobian::default()
        }];
        let chain = JacobianChain::from_elementals(&elementals, 10);
        let op = cheapest_accumulation(&chain, 0);
        assert_eq!(op.mode, Mode::Tangent);
        assert_eq!(op.fma, 54);
    }

    #[test]
    fn adjacent_blocks_yield_a_multiplication() {
        let params = OptimizerParams {
            machines: 0,
            matrix_free: false,
            time_to_solve: 0.0,
        };
        let mut chain = chain_with_dims(&[(3, 2, 18), (2, 3, 18)]);
        assert!(chain.apply(&cheapest_accumulation(&chain, 0)));
        assert!(chain.apply(&cheapest_accumulation(&chain, 1)));

        let pair = extension_candidates(&chain, &params, 1, 1);
        let mult = pair[1].expect("leftward multiplication");
        assert_eq!(mult.j, 1);
        assert_eq!(mult.k, 0);
        assert_eq!(mult.i, 0);
        // m_1 · m_0 · n_0 = 2 · 3 · 2
        assert_eq!(mult.fma, 12);
        assert!(pair[0].is_none());
    }

    #[test]
    fn matrix_free_offers_eliminations() {
        let params = OptimizerParams {
            machines: 0,
            matrix_free: true,
            time_to_solve: 0.0,
        };
        let mut chain = chain_with_dims(&[(1, 1, 4), (1, 1, 5), (1, 1, 6)]);
        assert!(chain.apply(&cheapest_accumulation(&chain, 1)));

        let pair = extension_candidates(&chain, &params, 1, 1);
        let forward = pair[0].expect("tangent elimination through F'_2");
        assert_eq!(forward.mode, Mode::Tangent);
        assert_eq!((forward.j, forward.k, forward.i), (2, 1, 1));
        assert_eq!(forward.fma, 6); // n = 1 column through 6 edges

        let backward = pair[1].expect("adjoint elimination through F'_0");
        assert_eq!(backward.mode, Mode::Adjoint);
        assert_eq!((backward.j, backward.k, backward.i), (1, 0, 0));
        assert_eq!(backward.fma, 4); // m = 1 row through 4 edges
    }

    #[test]
    fn stats_display_matches_report_shape() {
        let stats = SearchStats {
            leafs_visited: 3,
            updated_makespan: 1,
            pruned_branches: vec![0, 2, 1],
        };
        let text = stats.to_string();
        assert!(text.contains("Leafs visited (= sequences scheduled): 3"));
        assert!(text.contains("Pruned branches: 3"));
        assert!(text.contains("[ 0 2 1 ]"));
    }
}
