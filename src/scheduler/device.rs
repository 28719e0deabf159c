//! Branch & bound scheduling restructured for device execution.
//!
//! The recursive scheduler cannot run as a SIMT work unit: lanes cannot
//! recurse independently and device allocations must be sized at compile
//! time. This module keeps the exact search tree and pruning of
//! [`BranchAndBoundScheduler`](super::BranchAndBoundScheduler) but drives
//! it with an explicit state machine over fixed-capacity frames, so one
//! scheduling problem maps onto one work unit. A pass budget stands in for
//! the wall clock, since device clocks are useless for cooperative
//! cancellation.
//!
//! Batches are flattened into one contiguous buffer of work units (a
//! single device transfer) and run in parallel; rayon plays the role of
//! the SIMT grid here.

use rayon::prelude::*;

use crate::operation::{Action, Operation};
use crate::sequence::Sequence;
use crate::timer::Timer;

use super::{usable_machines, BatchOutcome, BranchAndBoundScheduler, ScheduleOutcome, Scheduler};

/// Fixed operation capacity of one device work unit.
pub const DEVICE_SEQUENCE_CAPACITY: usize = 40;

/// Fixed machine capacity of one device work unit.
pub const DEVICE_MAX_MACHINES: usize = 20;

/// Loop-iteration cap per work unit; generous enough for every sequence
/// that fits the capacity above.
pub const DEFAULT_PASS_BUDGET: u64 = 50_000_000;

/// Fixed-capacity mirror of [`Sequence`] for device work units. All
/// queries are loops; nothing recurses or allocates.
#[derive(Clone, Copy, Debug)]
pub struct DeviceSequence {
    ops: [Operation; DEVICE_SEQUENCE_CAPACITY],
    len: usize,
}

impl DeviceSequence {
    /// `None` when the sequence exceeds the fixed capacity, an offload
    /// failure the caller must handle.
    pub fn from_sequence(seq: &Sequence) -> Option<Self> {
        if seq.len() > DEVICE_SEQUENCE_CAPACITY {
            return None;
        }
        let mut ops = [Operation::default(); DEVICE_SEQUENCE_CAPACITY];
        ops[..seq.len()].copy_from_slice(seq.ops());
        Some(DeviceSequence {
            ops,
            len: seq.len(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn ops(&self) -> &[Operation] {
        &self.ops[..self.len]
    }

    fn reset_schedule(&mut self) {
        for op in &mut self.ops[..self.len] {
            op.is_scheduled = false;
            op.start_time = 0;
            op.thread = 0;
        }
    }

    fn sequential_makespan(&self) -> usize {
        self.ops[..self.len].iter().map(|op| op.fma).sum()
    }

    pub fn count_accumulations(&self) -> usize {
        self.ops[..self.len]
            .iter()
            .filter(|op| op.action == Action::Accumulation)
            .count()
    }

    fn is_schedulable(&self, op_idx: usize) -> bool {
        let op = &self.ops[op_idx];
        self.ops[..self.len]
            .iter()
            .all(|other| !op.depends_on(other) || other.is_scheduled)
    }

    fn earliest_start(&self, op_idx: usize) -> usize {
        let op = &self.ops[op_idx];
        let mut max_time = 0;
        for other in &self.ops[..self.len] {
            if op.depends_on(other) {
                max_time = max_time.max(other.end_time());
            }
        }
        max_time
    }

    fn successor(&self, op_idx: usize) -> Option<usize> {
        let op = &self.ops[op_idx];
        self.ops[..self.len]
            .iter()
            .position(|other| other.depends_on(op))
    }

    /// Iterative form of the host critical path: for every operation,
    /// walk the successor chain to the root accumulating costs against
    /// the current start times.
    fn critical_path(&self) -> usize {
        let mut max_path = 0;
        for start_idx in 0..self.len {
            let mut time = 0;
            let mut current = start_idx;
            loop {
                let op = &self.ops[current];
                time = time.max(op.start_time) + op.fma;
                match self.successor(current) {
                    Some(next) => current = next,
                    None => break,
                }
            }
            max_path = max_path.max(time);
        }
        max_path
    }
}

/// Saved state of one placement: the cursors that chose it and the
/// search state as it was just before the operation was placed.
#[derive(Clone, Copy, Default)]
struct Frame {
    op: usize,
    machine: usize,
    makespan: usize,
    idle_time: usize,
    loads: [usize; DEVICE_MAX_MACHINES],
}

enum Step {
    Descend,
    RevertMachine,
    RevertOp,
    RevertDepth,
}

struct KernelResult {
    best_makespan: usize,
    /// A schedule strictly better than the upper bound was found; `best`
    /// holds its snapshot.
    improved: bool,
    /// The search tree was exhausted within the pass budget.
    completed: bool,
    best: DeviceSequence,
}

/// Machines worth trying for the next placement: every loaded machine
/// plus at most one empty one (the loaded machines always form a prefix,
/// so the first empty slot covers the rest).
#[inline]
fn machine_limit(loads: &[usize; DEVICE_MAX_MACHINES], usable: usize) -> usize {
    match loads[..usable].iter().position(|&load| load == 0) {
        Some(first_empty) => first_empty + 1,
        None => usable,
    }
}

/// One work unit of the device kernel: schedule `work` on `usable`
/// machines, beating `upper_bound` if possible. `lower_bound` is the
/// caller-computed critical path used for the proven-optimum early exit.
fn schedule_work_unit(
    work: &mut DeviceSequence,
    usable: usize,
    upper_bound: usize,
    lower_bound: usize,
    pass_budget: u64,
) -> KernelResult {
    let len = work.len();
    let total_work = work.sequential_makespan();

    let mut result = KernelResult {
        best_makespan: upper_bound,
        improved: false,
        completed: true,
        best: *work,
    };

    let mut frames = [Frame::default(); DEVICE_SEQUENCE_CAPACITY];
    let mut loads = [0usize; DEVICE_MAX_MACHINES];
    let mut floor_makespan = 0;
    let mut floor_idle = 0;
    let mut floor_loads = loads;

    let mut makespan = 0;
    let mut idle_time = 0;
    let mut depth = 0;
    let mut op = 0;
    let mut machine = 0;

    let mut passes: u64 = 0;
    let mut step = Step::Descend;

    loop {
        passes += 1;
        if passes > pass_budget {
            result.completed = false;
            break;
        }

        match step {
            Step::Descend => {
                // Advance the cursor past scheduled or blocked operations.
                while op < len && (work.ops[op].is_scheduled || !work.is_schedulable(op)) {
                    op += 1;
                }
                if op >= len {
                    if depth == 0 {
                        // Cursor overflow at the root: the tree is
                        // exhausted and the kernel is done.
                        break;
                    }
                    step = Step::RevertDepth;
                    continue;
                }

                let earliest = work.earliest_start(op);
                let start = loads[machine].max(earliest);
                let placed = &mut work.ops[op];
                placed.is_scheduled = true;
                placed.start_time = start;
                placed.thread = machine;
                let fma = placed.fma;
                idle_time += start - loads[machine];
                loads[machine] = start + fma;
                makespan = makespan.max(loads[machine]);

                if depth + 1 == len {
                    if makespan < result.best_makespan {
                        result.best_makespan = makespan;
                        result.best = *work;
                        result.improved = true;
                        if result.best_makespan <= lower_bound {
                            break;
                        }
                    }
                    step = Step::RevertMachine;
                } else {
                    let bound = ((idle_time + total_work) / usable).max(work.critical_path());
                    if bound.max(makespan) < result.best_makespan {
                        frames[depth] = Frame {
                            op,
                            machine,
                            makespan: floor_makespan,
                            idle_time: floor_idle,
                            loads: floor_loads,
                        };
                        floor_makespan = makespan;
                        floor_idle = idle_time;
                        floor_loads = loads;
                        depth += 1;
                        op = 0;
                        machine = 0;
                    } else {
                        step = Step::RevertMachine;
                    }
                }
            }
            Step::RevertMachine => {
                work.ops[op].is_scheduled = false;
                work.ops[op].start_time = 0;
                makespan = floor_makespan;
                idle_time = floor_idle;
                loads = floor_loads;

                machine += 1;
                step = if machine >= machine_limit(&loads, usable) {
                    Step::RevertOp
                } else {
                    Step::Descend
                };
            }
            Step::RevertOp => {
                op += 1;
                machine = 0;
                step = Step::Descend;
            }
            Step::RevertDepth => {
                depth -= 1;
                let frame = frames[depth];
                work.ops[frame.op].is_scheduled = false;
                work.ops[frame.op].start_time = 0;
                makespan = frame.makespan;
                idle_time = frame.idle_time;
                loads = frame.loads;
                floor_makespan = frame.makespan;
                floor_idle = frame.idle_time;
                floor_loads = frame.loads;

                op = frame.op;
                machine = frame.machine + 1;
                step = if machine >= machine_limit(&loads, usable) {
                    Step::RevertOp
                } else {
                    Step::Descend
                };
            }
        }
    }

    result
}

/// Iterative branch & bound scheduler over fixed-capacity work units.
///
/// Inputs that exceed the device capacities are an offload failure; those
/// fall back to the recursive CPU scheduler with `fell_back` raised in the
/// outcome.
#[derive(Clone, Copy, Debug)]
pub struct DeviceScheduler {
    pass_budget: u64,
    fallback: BranchAndBoundScheduler,
}

impl DeviceScheduler {
    pub fn new() -> Self {
        Self::with_pass_budget(DEFAULT_PASS_BUDGET)
    }

    pub fn with_pass_budget(pass_budget: u64) -> Self {
        DeviceScheduler {
            pass_budget,
            fallback: BranchAndBoundScheduler,
        }
    }

    fn schedule_on_device(
        &self,
        seq: &mut Sequence,
        usable: usize,
        upper_bound: usize,
    ) -> Option<ScheduleOutcome> {
        if usable > DEVICE_MAX_MACHINES {
            return None;
        }
        let mut work = DeviceSequence::from_sequence(seq)?;
        work.reset_schedule();

        let lower_bound = work.critical_path();
        if lower_bound >= upper_bound {
            return Some(ScheduleOutcome::finished(lower_bound));
        }

        let result =
            schedule_work_unit(&mut work, usable, upper_bound, lower_bound, self.pass_budget);
        if result.improved {
            for idx in 0..seq.len() {
                let best = result.best.ops[idx];
                seq[idx].thread = best.thread;
                seq[idx].start_time = best.start_time;
                seq[idx].is_scheduled = true;
            }
        }

        Some(ScheduleOutcome {
            makespan: result.best_makespan,
            finished: result.completed,
            fell_back: false,
        })
    }
}

impl Default for DeviceScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for DeviceScheduler {
    fn schedule(
        &self,
        seq: &mut Sequence,
        machines: usize,
        upper_bound: usize,
        timer: &Timer,
    ) -> ScheduleOutcome {
        let usable = usable_machines(seq, machines);
        if usable == 0 {
            return ScheduleOutcome::finished(0);
        }

        match self.schedule_on_device(seq, usable, upper_bound) {
            Some(outcome) => outcome,
            None => {
                let mut outcome = self.fallback.schedule(seq, usable, upper_bound, timer);
                outcome.fell_back = true;
                outcome
            }
        }
    }

    /// Flatten the batch into one contiguous buffer of work units and run
    /// the kernel over all of them in parallel. Sub-problems that do not
    /// fit the device take the CPU fallback individually.
    fn schedule_batch(
        &self,
        seqs: &mut [Sequence],
        machines: usize,
        upper_bound: usize,
        timer: &Timer,
    ) -> BatchOutcome {
        struct Unit {
            index: usize,
            work: DeviceSequence,
            usable: usize,
            lower_bound: usize,
        }

        let mut units: Vec<Unit> = Vec::with_capacity(seqs.len());
        let mut outcomes: Vec<Option<ScheduleOutcome>> = vec![None; seqs.len()];

        for (index, seq) in seqs.iter_mut().enumerate() {
            let usable = usable_machines(seq, machines);
            if usable == 0 {
                outcomes[index] = Some(ScheduleOutcome::finished(0));
                continue;
            }
            let fits = usable <= DEVICE_MAX_MACHINES;
            match DeviceSequence::from_sequence(seq).filter(|_| fits) {
                Some(mut work) => {
                    work.reset_schedule();
                    let lower_bound = work.critical_path();
                    if lower_bound >= upper_bound {
                        outcomes[index] = Some(ScheduleOutcome::finished(lower_bound));
                    } else {
                        units.push(Unit {
                            index,
                            work,
                            usable,
                            lower_bound,
                        });
                    }
                }
                None => {
                    let mut outcome = self.fallback.schedule(seq, usable, upper_bound, timer);
                    outcome.fell_back = true;
                    outcomes[index] = Some(outcome);
                }
            }
        }

        let pass_budget = self.pass_budget;
        let results: Vec<(usize, KernelResult)> = units
            .par_iter_mut()
            .map(|unit| {
                let result = schedule_work_unit(
                    &mut unit.work,
                    unit.usable,
                    upper_bound,
                    unit.lower_bound,
                    pass_budget,
                );
                (unit.index, result)
            })
            .collect();

        for (index, result) in results {
            if result.improved {
                let seq = &mut seqs[index];
                for idx in 0..seq.len() {
                    let best = result.best.ops[idx];
                    seq[idx].thread = best.thread;
                    seq[idx].start_time = best.start_time;
                    seq[idx].is_scheduled = true;
                }
            }
            outcomes[index] = Some(ScheduleOutcome {
                makespan: result.best_makespan,
                finished: result.completed,
                fell_back: false,
            });
        }

        let mut best_index = None;
        let mut best_makespan = upper_bound;
        let mut finished = true;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let outcome = outcome.expect("every sub-problem was scheduled");
            finished &= outcome.finished;
            if outcome.makespan < best_makespan {
                best_makespan = outcome.makespan;
                best_index = Some(index);
            }
        }

        BatchOutcome {
            best_index,
            best_makespan,
            finished,
        }
    }
}
