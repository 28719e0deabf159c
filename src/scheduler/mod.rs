//! Schedulers: assign a machine and start time to every operation of an
//! elimination sequence.
//!
//! All schedulers share one object-safe interface so the outer optimizers
//! can be wired against any of them. `schedule` works on a single
//! sequence; `schedule_batch` handles a set of independent sequences at
//! once and reports which one came out best (the device scheduler
//! overrides it to run the whole batch through its fixed-capacity kernel
//! in parallel).

pub mod branch_and_bound;
pub mod device;
pub mod priority_list;

pub use branch_and_bound::BranchAndBoundScheduler;
pub use device::{DeviceScheduler, DEVICE_MAX_MACHINES, DEVICE_SEQUENCE_CAPACITY};
pub use priority_list::PriorityListScheduler;

use crate::sequence::Sequence;
use crate::timer::Timer;

/// Result of scheduling one sequence.
#[derive(Clone, Copy, Debug)]
pub struct ScheduleOutcome {
    /// Best makespan found; equals the given upper bound when nothing
    /// better was reachable.
    pub makespan: usize,
    /// The search ran to completion (no timeout, no exhausted pass
    /// budget).
    pub finished: bool,
    /// The work was redirected to the CPU fallback because it did not fit
    /// the device capacities. Always `false` for CPU schedulers.
    pub fell_back: bool,
}

impl ScheduleOutcome {
    pub(crate) fn finished(makespan: usize) -> Self {
        ScheduleOutcome {
            makespan,
            finished: true,
            fell_back: false,
        }
    }
}

/// Result of scheduling a batch of independent sequences.
#[derive(Clone, Copy, Debug)]
pub struct BatchOutcome {
    /// Index of the sub-problem with the smallest makespan, if any beat
    /// the upper bound.
    pub best_index: Option<usize>,
    pub best_makespan: usize,
    pub finished: bool,
}

/// Cap the machine count at something the sequence can actually use: the
/// accumulations are the only source-level parallelism, so more machines
/// than accumulations can never help. `machines = 0` means unbounded.
pub(crate) fn usable_machines(seq: &Sequence, machines: usize) -> usize {
    let cap = seq.count_accumulations();
    if machines > 0 && machines < cap {
        machines
    } else {
        cap
    }
}

pub trait Scheduler: Sync {
    /// Schedule `seq` on up to `machines` machines (0 = unbounded),
    /// looking only for schedules strictly better than `upper_bound`. The
    /// exact schedulers write back into `seq` only on improvement and
    /// otherwise leave its previous schedule alone; the list scheduler
    /// always overwrites.
    fn schedule(
        &self,
        seq: &mut Sequence,
        machines: usize,
        upper_bound: usize,
        timer: &Timer,
    ) -> ScheduleOutcome;

    /// Schedule every sequence of a batch and report the best one. The
    /// default implementation just loops; device-backed schedulers run the
    /// batch in parallel.
    fn schedule_batch(
        &self,
        seqs: &mut [Sequence],
        machines: usize,
        upper_bound: usize,
        timer: &Timer,
    ) -> BatchOutcome {
        let mut best_index = None;
        let mut best_makespan = upper_bound;
        let mut finished = true;

        for (idx, seq) in seqs.iter_mut().enumerate() {
            let outcome = self.schedule(seq, machines, best_makespan, timer);
            finished &= outcome.finished;
            if outcome.makespan < best_makespan {
                best_makespan = outcome.makespan;
                best_index = Some(idx);
            }
        }

        BatchOutcome {
            best_index,
            best_makespan,
            finished,
        }
    }
}
