//! Atomic operations on a Jacobian chain and their precedence relation.
//!
//! Every step of an elimination sequence is one [`Operation`]: accumulating
//! an elemental Jacobian from its DAG, multiplying two adjacent accumulated
//! blocks, or a matrix-free elimination across a block boundary. The
//! operation also carries its schedule slot (`thread`, `start_time`) once a
//! scheduler has placed it.

use std::fmt;

/// What an operation does to the chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Action {
    #[default]
    None,
    Multiplication,
    Accumulation,
    Elimination,
}

/// Differentiation mode of an accumulation or elimination.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    None,
    Tangent,
    Adjoint,
}

/// One atomic computation on the chain.
///
/// The indices `i <= k < j` identify the Jacobian blocks involved; the
/// result always covers block `(j, i)`. `fma` is the fused-multiply-add
/// count and doubles as the processing time on any machine.
#[derive(Clone, Copy, Debug, Default)]
pub struct Operation {
    pub action: Action,
    pub mode: Mode,
    pub j: usize,
    pub k: usize,
    pub i: usize,
    pub fma: usize,
    pub thread: usize,
    pub start_time: usize,
    pub is_scheduled: bool,
}

impl Operation {
    /// Accumulation of the elemental block `(j, j)`.
    pub fn accumulation(mode: Mode, j: usize, fma: usize) -> Self {
        debug_assert!(mode != Mode::None);
        Operation {
            action: Action::Accumulation,
            mode,
            j,
            k: j,
            i: j,
            fma,
            ..Operation::default()
        }
    }

    /// Multiplication `(j, k+1) × (k, i) → (j, i)`.
    pub fn multiplication(j: usize, k: usize, i: usize, fma: usize) -> Self {
        Operation {
            action: Action::Multiplication,
            j,
            k,
            i,
            fma,
            ..Operation::default()
        }
    }

    /// Matrix-free elimination producing block `(j, i)`.
    pub fn elimination(mode: Mode, j: usize, k: usize, i: usize, fma: usize) -> Self {
        debug_assert!(mode != Mode::None);
        Operation {
            action: Action::Elimination,
            mode,
            j,
            k,
            i,
            fma,
            ..Operation::default()
        }
    }

    /// Completion time once scheduled.
    #[inline]
    pub fn end_time(&self) -> usize {
        self.start_time + self.fma
    }

    /// True iff `other`'s result block is an immediate input of `self`,
    /// i.e. `other` must complete before `self` can start.
    ///
    /// Accumulations read only the elemental DAG and depend on nothing.
    /// This predicate sits on the innermost loop of both schedulers and the
    /// lower-bound computations; keep it branch-light.
    #[inline]
    pub fn depends_on(&self, other: &Operation) -> bool {
        debug_assert!(self.action != Action::None);
        debug_assert!(other.action != Action::None);
        self.action != Action::Accumulation
            && ((self.i == other.i && self.k == other.j)
                || (self.j == other.j && self.k + 1 == other.i))
    }

    /// Dual of [`depends_on`](Self::depends_on): `self` produces an input
    /// of `other`.
    #[inline]
    pub fn feeds(&self, other: &Operation) -> bool {
        other.depends_on(self)
    }

    /// Both operations produce the same block `(j, i)`.
    #[inline]
    pub fn produces_same_block(&self, other: &Operation) -> bool {
        self.i == other.i && self.j == other.j
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::None => "   ",
            Action::Multiplication => "MUL",
            Action::Accumulation => "ACC",
            Action::Elimination => "ELI",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::None => "   ",
            Mode::Tangent => "TAN",
            Mode::Adjoint => "ADJ",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Operation {
    /// Three-column dump format: action, mode, block indices, schedule slot
    /// and cost. Accumulations print only the two indices of their diagonal
    /// block, offset by mode so tangent and adjoint columns line up.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.action == Action::Accumulation {
            debug_assert!(self.mode != Mode::None);
            if self.mode == Mode::Tangent {
                write!(
                    f,
                    "{} {} ({:2} {:2}   ) [{}: {} - {}] {}",
                    self.action,
                    self.mode,
                    self.i,
                    self.j + 1,
                    self.thread,
                    self.start_time,
                    self.end_time(),
                    self.fma
                )
            } else {
                write!(
                    f,
                    "{} {} (   {:2} {:2}) [{}: {} - {}] {}",
                    self.action,
                    self.mode,
                    self.i,
                    self.j + 1,
                    self.thread,
                    self.start_time,
                    self.end_time(),
                    self.fma
                )
            }
        } else {
            write!(
                f,
                "{} {} ({:2} {:2} {:2}) [{}: {} - {}] {}",
                self.action,
                self.mode,
                self.i,
                self.k + 1,
                self.j + 1,
                self.thread,
                self.start_time,
                self.end_time(),
                self.fma
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplication_depends_on_both_inputs() {
        // (2, 1) × (0, 0) → (2, 0)
        let mult = Operation::multiplication(2, 0, 0, 6);
        let left = Operation::multiplication(2, 1, 1, 4); // produces (2, 1)
        let right = Operation::accumulation(Mode::Tangent, 0, 3); // produces (0, 0)

        assert!(mult.depends_on(&left));
        assert!(mult.depends_on(&right));
        assert!(left.feeds(&mult));
        assert!(right.feeds(&mult));
    }

    #[test]
    fn accumulation_depends_on_nothing() {
        let acc = Operation::accumulation(Mode::Adjoint, 1, 5);
        let other = Operation::accumulation(Mode::Tangent, 0, 3);
        assert!(!acc.depends_on(&other));
    }

    #[test]
    fn precedence_is_antisymmetric_here() {
        let mult = Operation::multiplication(1, 0, 0, 2);
        let acc = Operation::accumulation(Mode::Tangent, 0, 3);
        assert!(mult.depends_on(&acc));
        assert!(!acc.depends_on(&mult));
    }

    #[test]
    fn unrelated_blocks_do_not_relate() {
        // (1, 0) and accumulation of (3, 3) share nothing.
        let a = Operation::multiplication(1, 0, 0, 2);
        let b = Operation::accumulation(Mode::Tangent, 3, 7);
        assert!(!a.depends_on(&b));
        assert!(!b.depends_on(&a));
    }

    #[test]
    fn tangent_elimination_depends_on_its_source_block() {
        // Eliminate forward through F'_2: consumes (1, 0), produces (2, 0).
        let eli = Operation::elimination(Mode::Tangent, 2, 1, 0, 4);
        let src = Operation::multiplication(1, 0, 0, 2); // produces (1, 0)
        assert!(eli.depends_on(&src));
    }

    #[test]
    fn block_equality_ignores_split_point() {
        let a = Operation::multiplication(3, 1, 0, 2);
        let b = Operation::multiplication(3, 2, 0, 9);
        assert!(a.produces_same_block(&b));
        assert!(!a.produces_same_block(&Operation::multiplication(2, 1, 0, 2)));
    }
}
