//! Greedy priority-list scheduling.
//!
//! Operations are drained from a max-heap keyed by in-tree depth (deepest
//! first, so the leaves of the precedence tree go early) and, within a
//! level, by cost. Each popped operation lands on the machine that can
//! start it first; ties prefer the machine with the smaller idle gap. One
//! pass, deterministic, and often optimal; exactly good enough to seed
//! the branch & bound scheduler's upper bound.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::sequence::Sequence;
use crate::timer::Timer;

use super::{usable_machines, ScheduleOutcome, Scheduler};

#[derive(Clone, Copy, Debug, Default)]
pub struct PriorityListScheduler;

impl Scheduler for PriorityListScheduler {
    fn schedule(
        &self,
        seq: &mut Sequence,
        machines: usize,
        _upper_bound: usize,
        _timer: &Timer,
    ) -> ScheduleOutcome {
        let machines = usable_machines(seq, machines);
        if machines == 0 {
            return ScheduleOutcome::finished(0);
        }

        // Heap entries: (level, fma, smallest-index-first). Levels must be
        // read before the schedule is reset; they only depend on the tree.
        let mut queue: BinaryHeap<(usize, usize, Reverse<usize>)> = (0..seq.len())
            .map(|idx| (seq.level(idx), seq[idx].fma, Reverse(idx)))
            .collect();

        seq.reset_schedule();

        let mut loads = vec![0usize; machines];
        while let Some((_, _, Reverse(op_idx))) = queue.pop() {
            let earliest = seq.earliest_start(op_idx);

            let mut thread = 0;
            let mut start = loads[0].max(earliest);
            let mut idle = start - loads[0];
            for (t, &load) in loads.iter().enumerate().skip(1) {
                let start_on_t = load.max(earliest);
                let idle_on_t = start_on_t - load;
                if start_on_t < start || (start_on_t == start && idle_on_t < idle) {
                    thread = t;
                    start = start_on_t;
                    idle = idle_on_t;
                }
            }

            let op = &mut seq[op_idx];
            op.thread = thread;
            op.start_time = start;
            op.is_scheduled = true;
            loads[thread] = start + op.fma;
        }

        ScheduleOutcome::finished(seq.makespan())
    }
}
