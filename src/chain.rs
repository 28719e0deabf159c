//! Jacobian chains: the mutable state of the bracketing search.
//!
//! A chain of length `q` holds one [`Jacobian`] record per block `(j, i)`
//! with `0 <= i <= j < q`. The diagonal blocks are the elemental
//! Jacobians of the chained functions; every other block is a potential
//! intermediate of the bracketing. The search mutates only the
//! `is_accumulated`/`is_used` flags through [`JacobianChain::apply`] and
//! undoes them through [`JacobianChain::revert`], which is what makes
//! backtracking possible without copying the whole chain.

use crate::operation::{Action, Mode, Operation};

/// One Jacobian block `(j, i)`: the derivative of output `j` with respect
/// to input `i`, of shape `m × n`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Jacobian {
    /// Row count (output dimension of function `j`).
    pub m: usize,
    /// Column count (input dimension of function `i`).
    pub n: usize,
    /// Edge count of the underlying elemental DAG(s); the unit of both
    /// accumulation cost and adjoint memory.
    pub edges_in_dag: usize,
    pub is_accumulated: bool,
    pub is_used: bool,
}

impl Jacobian {
    /// Cost of materializing this block by one sweep per column (tangent)
    /// or per row (adjoint).
    #[inline]
    pub fn accumulation_fma(&self, mode: Mode) -> usize {
        match mode {
            Mode::Tangent => self.n * self.edges_in_dag,
            Mode::Adjoint => self.m * self.edges_in_dag,
            Mode::None => unreachable!("accumulation requires a mode"),
        }
    }

    /// Cost of propagating `width` directions through this block's DAG
    /// without materializing it (matrix-free elimination).
    #[inline]
    pub fn propagation_fma(&self, mode: Mode, width: usize) -> usize {
        debug_assert!(mode != Mode::None);
        width * self.edges_in_dag
    }
}

/// Triangular family of Jacobian blocks plus the adjoint memory limit.
#[derive(Clone, Debug)]
pub struct JacobianChain {
    length: usize,
    memory_limit: usize,
    jacobians: Vec<Jacobian>,
}

impl JacobianChain {
    /// Build a chain from its `q` elemental Jacobians, listed innermost
    /// first. Compound blocks are derived immediately: `(j, i)` has the
    /// rows of `j`, the columns of `i`, and the summed DAG edges of the
    /// elementals it spans. `memory_limit = 0` means unbounded.
    pub fn from_elementals(elementals: &[Jacobian], memory_limit: usize) -> Self {
        let length = elementals.len();
        assert!(length > 0, "empty chain");
        for pair in elementals.windows(2) {
            debug_assert_eq!(
                pair[0].m, pair[1].n,
                "chain interfaces must compose"
            );
        }

        let mut jacobians = vec![Jacobian::default(); length * (length + 1) / 2];
        for j in 0..length {
            for i in 0..=j {
                let edges: usize = elementals[i..=j].iter().map(|e| e.edges_in_dag).sum();
                jacobians[Self::index_of(j, i)] = Jacobian {
                    m: elementals[j].m,
                    n: elementals[i].n,
                    edges_in_dag: edges,
                    is_accumulated: false,
                    is_used: false,
                };
            }
        }

        JacobianChain {
            length,
            memory_limit,
            jacobians,
        }
    }

    #[inline]
    fn index_of(j: usize, i: usize) -> usize {
        debug_assert!(i <= j);
        j * (j + 1) / 2 + i
    }

    /// Number of elemental Jacobians in the chain.
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    #[inline]
    pub fn jacobian(&self, j: usize, i: usize) -> &Jacobian {
        &self.jacobians[Self::index_of(j, i)]
    }

    #[inline]
    fn jacobian_mut(&mut self, j: usize, i: usize) -> &mut Jacobian {
        &mut self.jacobians[Self::index_of(j, i)]
    }

    /// The whole Jacobian `(q-1, 0)` has been accumulated.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.jacobian(self.length - 1, 0).is_accumulated
    }

    /// Upper bound on the length of any elimination sequence: `q`
    /// accumulations plus `q - 1` combining operations.
    #[inline]
    pub fn longest_possible_sequence(&self) -> usize {
        2 * self.length - 1
    }

    #[inline]
    fn memory_allows(&self, edges: usize) -> bool {
        self.memory_limit == 0 || edges <= self.memory_limit
    }

    /// Try to apply `op` to the chain. Every precondition is checked
    /// before any flag is touched, so a `false` return leaves the chain
    /// untouched and a later [`revert`](Self::revert) of a *successful*
    /// apply restores it bit for bit.
    pub fn apply(&mut self, op: &Operation) -> bool {
        match op.action {
            Action::Accumulation => {
                debug_assert!(op.j == op.i && op.j == op.k, "accumulation targets a diagonal block");
                let jac = self.jacobian(op.j, op.i);
                if jac.is_accumulated || jac.is_used {
                    return false;
                }
                if op.mode == Mode::Adjoint && !self.memory_allows(jac.edges_in_dag) {
                    return false;
                }
                self.jacobian_mut(op.j, op.i).is_accumulated = true;
                true
            }
            Action::Multiplication => {
                debug_assert!(op.i <= op.k && op.k < op.j);
                let target = self.jacobian(op.j, op.i);
                let left = self.jacobian(op.j, op.k + 1);
                let right = self.jacobian(op.k, op.i);
                if target.is_accumulated
                    || !left.is_accumulated
                    || left.is_used
                    || !right.is_accumulated
                    || right.is_used
                {
                    return false;
                }
                self.jacobian_mut(op.j, op.k + 1).is_used = true;
                self.jacobian_mut(op.k, op.i).is_used = true;
                self.jacobian_mut(op.j, op.i).is_accumulated = true;
                true
            }
            Action::Elimination => match op.mode {
                Mode::Tangent => {
                    // Push (k, i) forward through the DAG of F'_{k+1}.
                    debug_assert_eq!(op.j, op.k + 1);
                    let target = self.jacobian(op.j, op.i);
                    let source = self.jacobian(op.k, op.i);
                    let elemental = self.jacobian(op.j, op.j);
                    if target.is_accumulated
                        || !source.is_accumulated
                        || source.is_used
                        || elemental.is_accumulated
                        || elemental.is_used
                    {
                        return false;
                    }
                    self.jacobian_mut(op.k, op.i).is_used = true;
                    self.jacobian_mut(op.j, op.i).is_accumulated = true;
                    true
                }
                Mode::Adjoint => {
                    // Pull (j, k+1) backward through the DAG of F'_k.
                    debug_assert_eq!(op.i, op.k);
                    let target = self.jacobian(op.j, op.i);
                    let source = self.jacobian(op.j, op.k + 1);
                    let elemental = self.jacobian(op.k, op.k);
                    if target.is_accumulated
                        || !source.is_accumulated
                        || source.is_used
                        || elemental.is_accumulated
                        || elemental.is_used
                        || !self.memory_allows(elemental.edges_in_dag)
                    {
                        return false;
                    }
                    self.jacobian_mut(op.j, op.k + 1).is_used = true;
                    self.jacobian_mut(op.j, op.i).is_accumulated = true;
                    true
                }
                Mode::None => unreachable!("elimination requires a mode"),
            },
            Action::None => unreachable!("cannot apply a blank operation"),
        }
    }

    /// Undo a previously successful [`apply`](Self::apply).
    pub fn revert(&mut self, op: &Operation) {
        match op.action {
            Action::Accumulation => {
                debug_assert!(self.jacobian(op.j, op.i).is_accumulated);
                self.jacobian_mut(op.j, op.i).is_accumulated = false;
            }
            Action::Multiplication => {
                self.jacobian_mut(op.j, op.i).is_accumulated = false;
                self.jacobian_mut(op.j, op.k + 1).is_used = false;
                self.jacobian_mut(op.k, op.i).is_used = false;
            }
            Action::Elimination => match op.mode {
                Mode::Tangent => {
                    self.jacobian_mut(op.j, op.i).is_accumulated = false;
                    self.jacobian_mut(op.k, op.i).is_used = false;
                }
                Mode::Adjoint => {
                    self.jacobian_mut(op.j, op.i).is_accumulated = false;
                    self.jacobian_mut(op.j, op.k + 1).is_used = false;
                }
                Mode::None => unreachable!(),
            },
            Action::None => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn subchain_blocks_sum_edges() {
        let chain = unit_chain(&[2, 3, 5]);
        assert_eq!(chain.jacobian(2, 0).edges_in_dag, 10);
        assert_eq!(chain.jacobian(1, 0).edges_in_dag, 5);
        assert_eq!(chain.jacobian(2, 2).edges_in_dag, 5);
    }

    #[test]
    fn accumulation_costs_follow_shape() {
        let jac = Jacobian {
            m: 2,
            n: 3,
            edges_in_dag: 18,
            ..Jacobian::default()
        };
        assert_eq!(jac.accumulation_fma(Mode::Tangent), 54);
        assert_eq!(jac.accumulation_fma(Mode::Adjoint), 36);
        assert_eq!(jac.propagation_fma(Mode::Tangent, 4), 72);
    }

    #[test]
    fn apply_then_revert_restores_the_chain() {
        let mut chain = unit_chain(&[1, 1]);
        let reference = chain.clone();

        let acc0 = Operation::accumulation(Mode::Tangent, 0, 1);
        let acc1 = Operation::accumulation(Mode::Tangent, 1, 1);
        let mult = Operation::multiplication(1, 0, 0, 1);

        assert!(chain.apply(&acc0));
        assert!(chain.apply(&acc1));
        assert!(chain.apply(&mult));
        assert!(chain.is_complete());

        chain.revert(&mult);
        chain.revert(&acc1);
        chain.revert(&acc0);

        for j in 0..2 {
            for i in 0..=j {
                let got = chain.jacobian(j, i);
                let want = reference.jacobian(j, i);
                assert_eq!(got.is_accumulated, want.is_accumulated);
                assert_eq!(got.is_used, want.is_used);
            }
        }
    }

    #[test]
    fn failed_apply_leaves_the_chain_untouched() {
        let mut chain = unit_chain(&[1, 1]);
        let mult = Operation::multiplication(1, 0, 0, 1);

        // Inputs are not accumulated yet.
        assert!(!chain.apply(&mult));
        assert!(!chain.jacobian(1, 0).is_accumulated);
        assert!(!chain.jacobian(0, 0).is_used);
        assert!(!chain.jacobian(1, 1).is_used);
    }

    #[test]
    fn multiplication_refuses_consumed_inputs() {
        let mut chain = unit_chain(&[1, 1, 1]);
        for j in 0..3 {
            assert!(chain.apply(&Operation::accumulation(Mode::Tangent, j, 1)));
        }
        assert!(chain.apply(&Operation::multiplication(1, 0, 0, 1)));
        // (1, 1) is spent; combining it again must fail.
        assert!(!chain.apply(&Operation::multiplication(2, 1, 1, 1)));
    }

    #[test]
    fn adjoint_memory_limit_gates_apply() {
        let elementals = [
            Jacobian {
                m: 1,
                n: 1,
                edges_in_dag: 9,
                ..Jacobian::default()
            },
            Jacobian {
                m: 1,
                n: 1,
                edges_in_dag: 2,
                ..Jacobian::default()
            },
        ];
        let mut chain = JacobianChain::from_elementals(&elementals, 4);

        assert!(!chain.apply(&Operation::accumulation(Mode::Adjoint, 0, 9)));
        assert!(chain.apply(&Operation::accumulation(Mode::Tangent, 0, 9)));
        assert!(chain.apply(&Operation::accumulation(Mode::Adjoint, 1, 2)));
    }

    #[test]
    fn tangent_elimination_consumes_its_source() {
        let mut chain = unit_chain(&[1, 1]);
        assert!(chain.apply(&Operation::accumulation(Mode::Tangent, 0, 1)));
        let eli = Operation::elimination(Mode::Tangent, 1, 0, 0, 1);
        assert!(chain.apply(&eli));
        assert!(chain.is_complete());
        assert!(chain.jacobian(0, 0).is_used);
        // The elemental stayed matrix-free.
        assert!(!chain.jacobian(1, 1).is_accumulated);

        chain.revert(&eli);
        assert!(!chain.is_complete());
        assert!(!chain.jacobian(0, 0).is_used);
    }
}
