//! Exact branch & bound scheduling, recursive CPU form.
//!
//! Depth-first search over (operation, machine) assignments. The search
//! state (per-machine loads, accumulated idle time, running makespan)
//! is mutated in place and restored on backtrack, so a node costs a
//! handful of integer writes plus one critical-path evaluation for the
//! bound.

use crate::sequence::Sequence;
use crate::timer::Timer;

use super::{usable_machines, ScheduleOutcome, Scheduler};

#[derive(Clone, Copy, Debug, Default)]
pub struct BranchAndBoundScheduler;

impl Scheduler for BranchAndBoundScheduler {
    fn schedule(
        &self,
        seq: &mut Sequence,
        machines: usize,
        upper_bound: usize,
        timer: &Timer,
    ) -> ScheduleOutcome {
        let machines = usable_machines(seq, machines);
        if machines == 0 {
            return ScheduleOutcome::finished(0);
        }

        let mut work = seq.clone();
        work.reset_schedule();

        // The unscheduled critical path bounds every schedule from below;
        // nothing to search for when the caller's bound is already there.
        let lower_bound = work.critical_path();
        if lower_bound >= upper_bound {
            return ScheduleOutcome::finished(lower_bound);
        }

        let mut search = Search {
            output: seq,
            total_work: work.sequential_makespan(),
            work,
            loads: vec![0; machines],
            idle_time: 0,
            makespan: 0,
            best_makespan: upper_bound,
            lower_bound,
            timer,
            timed_out: false,
        };
        search.branch();

        ScheduleOutcome {
            makespan: search.best_makespan,
            finished: !search.timed_out,
            fell_back: false,
        }
    }
}

struct Search<'a> {
    /// Caller's sequence; receives the best schedule found.
    output: &'a mut Sequence,
    /// Scratch copy the DFS mutates.
    work: Sequence,
    loads: Vec<usize>,
    idle_time: usize,
    makespan: usize,
    best_makespan: usize,
    total_work: usize,
    lower_bound: usize,
    timer: &'a Timer,
    timed_out: bool,
}

impl Search<'_> {
    /// One search node. Returns `true` to unwind the whole search (proven
    /// optimum or timeout).
    fn branch(&mut self) -> bool {
        if self.timer.expired() {
            self.timed_out = true;
            return true;
        }

        let machines = self.loads.len();
        let mut everything_scheduled = true;

        for op_idx in 0..self.work.len() {
            if self.work[op_idx].is_scheduled {
                continue;
            }
            everything_scheduled = false;

            if !self.work.is_schedulable(op_idx) {
                continue;
            }

            self.work[op_idx].is_scheduled = true;
            let earliest = self.work.earliest_start(op_idx);
            let fma = self.work[op_idx].fma;

            // Empty machines are interchangeable; trying one of them
            // covers all.
            let mut tried_empty_machine = false;
            for t in 0..machines {
                if self.loads[t] == 0 {
                    if tried_empty_machine {
                        break;
                    }
                    tried_empty_machine = true;
                }

                let start = self.loads[t].max(earliest);
                let old_start = self.work[op_idx].start_time;
                let old_load = self.loads[t];
                let old_idle = self.idle_time;
                let old_makespan = self.makespan;

                self.work[op_idx].start_time = start;
                self.work[op_idx].thread = t;
                self.loads[t] = start + fma;
                self.idle_time += start - old_load;
                self.makespan = self.makespan.max(self.loads[t]);

                let bound = ((self.idle_time + self.total_work) / machines)
                    .max(self.work.critical_path());
                if bound.max(self.makespan) < self.best_makespan && self.branch() {
                    return true;
                }

                self.loads[t] = old_load;
                self.idle_time = old_idle;
                self.makespan = old_makespan;
                self.work[op_idx].start_time = old_start;
            }

            self.work[op_idx].is_scheduled = false;
        }

        if everything_scheduled && self.makespan < self.best_makespan {
            self.best_makespan = self.makespan;
            for idx in 0..self.work.len() {
                self.output[idx].thread = self.work[idx].thread;
                self.output[idx].start_time = self.work[idx].start_time;
                self.output[idx].is_scheduled = true;
            }
            if self.best_makespan <= self.lower_bound {
                return true;
            }
        }

        false
    }
}
