//! Dynamic programming over bracketings.
//!
//! Classic chain-product table extended with a machine budget: an entry
//! `c(j, i, t)` is the best makespan for accumulating block `(j, i)` when
//! its operations may use `t` machines, combining each split either
//! serially on the same machines or in parallel on a two-way machine
//! partition. Every entry corresponds to a concrete machine-partitioned
//! schedule, so the reconstructed sequence achieves exactly the table
//! value; that is what makes the result safe to use as a branch & bound
//! upper bound. Matrix-free eliminations are outside this model; the
//! bracketing search explores those on its own.

use crate::chain::JacobianChain;
use crate::operation::Operation;
use crate::sequence::Sequence;

use super::cheapest_accumulation;

#[derive(Clone, Copy, Debug, Default)]
enum Split {
    /// Elemental block: a single accumulation.
    #[default]
    Leaf,
    /// Split at `k`, both halves on the full machine set, one after the
    /// other.
    Serial { k: usize },
    /// Split at `k`; the lower half gets `lower_machines` of the
    /// machines, the upper half the rest, side by side.
    Parallel { k: usize, lower_machines: usize },
}

#[derive(Clone, Copy, Debug, Default)]
struct Cell {
    cost: usize,
    split: Split,
}

pub struct DynamicProgrammingOptimizer;

impl DynamicProgrammingOptimizer {
    /// Optimal bracketing of `chain` under the machine-partition model,
    /// returned as a fully scheduled sequence. `machines = 0` means
    /// unbounded (one machine per elemental is already enough).
    pub fn solve(&self, chain: &JacobianChain, machines: usize) -> Sequence {
        let q = chain.length();
        let budget = if machines == 0 { q } else { machines.min(q) };

        let plan = Plan::build(chain, budget);

        let mut sequence = Sequence::new();
        let end = plan.emit(q - 1, 0, budget, 0, 0, &mut sequence);
        debug_assert_eq!(end, plan.cell(q - 1, 0, budget).cost);
        debug_assert_eq!(sequence.makespan(), end);
        sequence
    }
}

struct Plan<'a> {
    chain: &'a JacobianChain,
    table: Vec<Cell>,
    budget: usize,
}

impl<'a> Plan<'a> {
    fn build(chain: &'a JacobianChain, budget: usize) -> Self {
        let q = chain.length();
        let mut plan = Plan {
            chain,
            table: vec![Cell::default(); q * (q + 1) / 2 * budget],
            budget,
        };

        for span in 0..q {
            for i in 0..q - span {
                let j = i + span;
                for t in 1..=budget {
                    let cell = if span == 0 {
                        Cell {
                            cost: cheapest_accumulation(chain, j).fma,
                            split: Split::Leaf,
                        }
                    } else {
                        plan.best_split(j, i, t)
                    };
                    let idx = plan.index(j, i, t);
                    plan.table[idx] = cell;
                }
            }
        }
        plan
    }

    #[inline]
    fn index(&self, j: usize, i: usize, t: usize) -> usize {
        debug_assert!(t >= 1 && t <= self.budget);
        (j * (j + 1) / 2 + i) * self.budget + (t - 1)
    }

    #[inline]
    fn cell(&self, j: usize, i: usize, t: usize) -> Cell {
        self.table[self.index(j, i, t)]
    }

    fn multiplication_fma(&self, j: usize, k: usize, i: usize) -> usize {
        let upper = self.chain.jacobian(j, k + 1);
        let lower = self.chain.jacobian(k, i);
        upper.m * lower.m * lower.n
    }

    fn best_split(&self, j: usize, i: usize, t: usize) -> Cell {
        let mut best = Cell {
            cost: usize::MAX,
            split: Split::Leaf,
        };

        for k in i..j {
            let mult = self.multiplication_fma(j, k, i);

            let serial = self
                .cell(j, k + 1, t)
                .cost
                .saturating_add(self.cell(k, i, t).cost)
                .saturating_add(mult);
            if serial < best.cost {
                best = Cell {
                    cost: serial,
                    split: Split::Serial { k },
                };
            }

            for lower_machines in 1..t {
                let upper_cost = self.cell(j, k + 1, t - lower_machines).cost;
                let lower_cost = self.cell(k, i, lower_machines).cost;
                let parallel = upper_cost.max(lower_cost).saturating_add(mult);
                if parallel < best.cost {
                    best = Cell {
                        cost: parallel,
                        split: Split::Parallel { k, lower_machines },
                    };
                }
            }
        }
        best
    }

    /// Emit the operations of block `(j, i)` scheduled on the machine
    /// range `[machine_base, machine_base + t)` starting at `start`.
    /// Returns the finish time of the block's final operation, which by
    /// construction equals `start + cell(j, i, t).cost`.
    fn emit(
        &self,
        j: usize,
        i: usize,
        t: usize,
        machine_base: usize,
        start: usize,
        sequence: &mut Sequence,
    ) -> usize {
        match self.cell(j, i, t).split {
            Split::Leaf => {
                let mut op = cheapest_accumulation(self.chain, j);
                op.thread = machine_base;
                op.start_time = start;
                op.is_scheduled = true;
                let end = op.end_time();
                sequence.push(op);
                end
            }
            Split::Serial { k } => {
                let lower_end = self.emit(k, i, t, machine_base, start, sequence);
                let upper_end = self.emit(j, k + 1, t, machine_base, lower_end, sequence);
                self.push_multiplication(j, k, i, machine_base, upper_end, sequence)
            }
            Split::Parallel { k, lower_machines } => {
                let lower_end = self.emit(k, i, lower_machines, machine_base, start, sequence);
                let upper_end = self.emit(
                    j,
                    k + 1,
                    t - lower_machines,
                    machine_base + lower_machines,
                    start,
                    sequence,
                );
                let ready = lower_end.max(upper_end);
                self.push_multiplication(j, k, i, machine_base, ready, sequence)
            }
        }
    }

    fn push_multiplication(
        &self,
        j: usize,
        k: usize,
        i: usize,
        machine: usize,
        start: usize,
        sequence: &mut Sequence,
    ) -> usize {
        let mut op = Operation::multiplication(j, k, i, self.multiplication_fma(j, k, i));
        op.thread = machine;
        op.start_time = start;
        op.is_scheduled = true;
        let end = op.end_time();
        sequence.push(op);
        end
    }
}
