// SPDX-License-Identifier: MIT

//! Run queue: accepted work and its execution schedule.
//!
//! Two aligned collections. The work table holds every accepted piece of
//! work, keyed by an id that is monotonic across the life of the agent and
//! never reused. The event list maps the next execution instant of each
//! piece of work back into the table; entries are ordered by time, then
//! phase, then id, so work due at the same second fires in ascending phase
//! order.
//!
//! `dispatch` runs everything due at or before `now`, reschedules
//! continuing work, and garbage-collects expired records whose method is no
//! longer running. A record whose final execution outlives its schedule
//! stays in the table flagged `expired` until the executor reports the key
//! finished (`on_method_finished`), at which point end-of-run fires and the
//! record is removed. The queue itself never raises bus events — dispatch
//! returns the expired ids and the engine raises `runq.expired` so handlers
//! cannot re-enter the queue.

use cw_core::{Invocation, WorkId};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Event raised (by the engine) when a work record terminates; payload is
/// the work id.
pub const CB_EXPIRED: &str = "runq.expired";

/// Seconds to defer clean-up of removed work whose method is still running.
pub const EXPIRE_WAIT_SECS: i64 = 2;

/// Seam to the method executor: the four per-work callbacks.
pub trait RunHandler {
    fn start_of_run(&mut self, inv: &Invocation) -> i32;
    fn command(&mut self, inv: &Invocation) -> i32;
    fn is_running(&self, inv: &Invocation) -> bool;
    fn end_of_run(&mut self, inv: &Invocation) -> i32;
}

/// Which of the optional callbacks a piece of work carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookSet {
    pub start_of_run: bool,
    pub command: bool,
    pub is_running: bool,
    pub end_of_run: bool,
}

impl HookSet {
    /// The full set the job layer wires to the executor.
    pub fn all() -> Self {
        Self {
            start_of_run: true,
            command: true,
            is_running: true,
            end_of_run: true,
        }
    }

    /// Command only; the minimum valid set.
    pub fn command_only() -> Self {
        Self {
            start_of_run: false,
            command: true,
            is_running: false,
            end_of_run: false,
        }
    }
}

/// Input to [`RunQueue::add`].
#[derive(Debug, Clone)]
pub struct WorkSpec {
    /// Absolute start time, epoch seconds; 0 means the queue's startup
    /// time.
    pub start: i64,
    /// Seconds between executions.
    pub interval: i64,
    /// Tie-break order within a second.
    pub phase: i64,
    /// Number of executions; 0 = indefinite.
    pub count: i64,
    /// Description / invocation key.
    pub key: String,
    pub hooks: HookSet,
    pub invoke: Invocation,
}

#[derive(Debug, Error)]
pub enum RunqError {
    #[error("bad work parameters for '{key}': start {start} interval {interval} phase {phase} count {count} command {has_command}")]
    BadParameter {
        key: String,
        start: i64,
        interval: i64,
        phase: i64,
        count: i64,
        has_command: bool,
    },
    /// The event list referenced a work id missing from the table —
    /// internal inconsistency, die severity.
    #[error("event list references missing work id {0}")]
    Inconsistent(WorkId),
}

/// Result of a successful [`RunQueue::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Added {
    Scheduled(WorkId),
    /// The work's schedule was already exhausted within the call; it is in
    /// the work table but no event will ever be enqueued and no id is
    /// handed out.
    Completed,
}

/// What a dispatch pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Work whose command callback ran this pass, in dispatch order.
    pub ran: Vec<WorkId>,
    /// Records finalised this pass; the engine raises [`CB_EXPIRED`] for
    /// each.
    pub expired: Vec<WorkId>,
}

struct Work {
    id: WorkId,
    start: i64,
    interval: i64,
    phase: i64,
    count: i64,
    key: String,
    hooks: HookSet,
    invoke: Arc<Invocation>,
    nruns: u32,
    expired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EventKey {
    due: i64,
    phase: i64,
    id: WorkId,
}

pub struct RunQueue {
    startup: i64,
    drain: bool,
    next_id: i64,
    table: BTreeMap<WorkId, Work>,
    events: BTreeMap<EventKey, ()>,
}

impl RunQueue {
    pub fn new(startup: i64) -> Self {
        Self {
            startup,
            drain: false,
            next_id: 0,
            table: BTreeMap::new(),
            events: BTreeMap::new(),
        }
    }

    /// Accept work and schedule its first event.
    ///
    /// Work must be ready to run when `add` is called: if the schedule
    /// makes it due now it will fire on the next dispatch pass. Negative
    /// timing fields or an absent command hook are parameter errors.
    pub fn add(&mut self, spec: WorkSpec, now: i64) -> Result<Added, RunqError> {
        if spec.start < 0
            || spec.interval < 0
            || spec.phase < 0
            || spec.count < 0
            || !spec.hooks.command
        {
            return Err(RunqError::BadParameter {
                key: spec.key,
                start: spec.start,
                interval: spec.interval,
                phase: spec.phase,
                count: spec.count,
                has_command: spec.hooks.command,
            });
        }

        let id = WorkId(self.next_id);
        self.next_id += 1;
        let work = Work {
            id,
            start: if spec.start == 0 {
                self.startup
            } else {
                spec.start
            },
            interval: spec.interval,
            phase: spec.phase,
            count: spec.count,
            key: spec.key,
            hooks: spec.hooks,
            invoke: Arc::new(spec.invoke),
            nruns: 0,
            expired: false,
        };
        debug!(id = %id, key = %work.key, interval = work.interval, phase = work.phase,
               count = work.count, "work accepted");
        self.table.insert(id, work);

        if self.sched_insert(id, 0, now) {
            Ok(Added::Scheduled(id))
        } else {
            // Entirely in the past (or draining); the record stays in the
            // table but will never be dispatched.
            Ok(Added::Completed)
        }
    }

    /// Compute the next execution of `id` and insert the event.
    ///
    /// `last` is the time of the most recent dispatch, or 0 if new or
    /// unknown. Returns false when the work has no further eligible
    /// executions (including while draining); the caller decides whether
    /// that makes the record expired.
    fn sched_insert(&mut self, id: WorkId, last: i64, now: i64) -> bool {
        if self.drain {
            return false;
        }
        let Some(work) = self.table.get_mut(&id) else {
            return false;
        };

        // Reform questionable parameters before they harm someone.
        if work.interval == 0 && work.count != 1 {
            warn!(key = %work.key, "forcing count=1 as interval is 0");
            work.count = 1;
        }
        if work.interval == 0 {
            work.interval = 1;
        }

        let lastw = last;
        let last = if last == 0 { now } else { last };
        let base = work.start;
        let final_ = base + (work.count - 1) * work.interval;

        let next = if base > now {
            // Future.
            Some(base)
        } else if work.count != 0 && final_ < now {
            // Finite and already exhausted.
            None
        } else {
            // Current or continuous.
            let mut next = base + ((last - base) / work.interval + 1) * work.interval;
            if lastw != 0 && next == lastw {
                // Never reschedule at the same time as the last run.
                next += work.interval;
            }
            if work.count != 0 && next > final_ {
                None
            } else {
                Some(next)
            }
        };

        match next {
            Some(due) => {
                debug!(key = %work.key, due, wait = due - now, "next run scheduled");
                let key = EventKey {
                    due,
                    phase: work.phase,
                    id,
                };
                // A non-expired record appears in the event list at most
                // once while idle.
                self.unschedule(id);
                self.events.insert(key, ());
                true
            }
            None => self.note_unscheduled(id),
        }
    }

    fn note_unscheduled(&mut self, id: WorkId) -> bool {
        if let Some(work) = self.table.get(&id) {
            if work.nruns > 0 {
                debug!(key = %work.key, nruns = work.nruns, "work expired");
            } else {
                debug!(key = %work.key, "work expired (never run)");
            }
        }
        false
    }

    /// Remove any event pointing at `id`.
    fn unschedule(&mut self, id: WorkId) {
        self.events.retain(|k, _| k.id != id);
    }

    /// Run everything due at or before `now`.
    ///
    /// Steps, atomic from the caller's viewpoint: walk the event list in
    /// (time, phase) order invoking start-of-run (first run only) and
    /// command; reschedule the dispatched work, marking it expired when
    /// its schedule is exhausted; then sweep the table for expired records
    /// that are no longer running, invoking end-of-run and removing them.
    pub fn dispatch(
        &mut self,
        now: i64,
        handler: &mut dyn RunHandler,
    ) -> Result<DispatchOutcome, RunqError> {
        let mut outcome = DispatchOutcome::default();
        let mut resched: Vec<WorkId> = Vec::new();

        while let Some((&key, _)) = self.events.first_key_value() {
            if key.due > now {
                break;
            }
            self.events.pop_first();
            let work = self
                .table
                .get_mut(&key.id)
                .ok_or(RunqError::Inconsistent(key.id))?;

            if !work.expired {
                if work.nruns == 0 && work.hooks.start_of_run && handler.start_of_run(&work.invoke) == -1 {
                    error!(key = %work.key, "start-of-run failed");
                }
                work.nruns += 1;
                if handler.command(&work.invoke) == -1 {
                    error!(key = %work.key, "command failed");
                }
                outcome.ran.push(key.id);
            }
            resched.push(key.id);
        }

        // Reschedule everything dispatched this pass; exhausted schedules
        // become expired records awaiting clean-up.
        for id in resched {
            if !self.sched_insert(id, now, now) {
                if let Some(work) = self.table.get_mut(&id) {
                    work.expired = true;
                }
            }
        }

        // Garbage-collect expired records that are not still running.
        let ids: Vec<WorkId> = self.table.keys().copied().collect();
        for id in ids {
            let Some(work) = self.table.get(&id) else {
                continue;
            };
            if !work.expired {
                continue;
            }
            if work.hooks.is_running {
                let invoke = Arc::clone(&work.invoke);
                if handler.is_running(&invoke) {
                    // Outstanding I/O; a later meth.finished finalises it.
                    continue;
                }
            }
            self.finalise(id, handler);
            outcome.expired.push(id);
        }

        Ok(outcome)
    }

    /// Remove `id` from the table, invoking end-of-run when the work ran
    /// at least once.
    fn finalise(&mut self, id: WorkId, handler: &mut dyn RunHandler) {
        let Some(work) = self.table.remove(&id) else {
            return;
        };
        if work.nruns > 0 && work.hooks.end_of_run {
            debug!(key = %work.key, nruns = work.nruns, "end-of-run for finished work");
            if handler.end_of_run(&work.invoke) == -1 {
                error!(key = %work.key, "end-of-run failed");
            }
        }
        self.unschedule(id);
    }

    /// A long-running method identified by `key` has completed. Finalise
    /// any expired records carrying that key; returns their ids for the
    /// engine to raise [`CB_EXPIRED`].
    pub fn on_method_finished(&mut self, key: &str, handler: &mut dyn RunHandler) -> Vec<WorkId> {
        let matching: Vec<WorkId> = self
            .table
            .values()
            .filter(|w| w.expired && w.key == key)
            .map(|w| w.id)
            .collect();
        for &id in &matching {
            debug!(key, id = %id, "end-of-run for long running work");
            self.finalise(id, handler);
        }
        matching
    }

    /// Cancel further dispatches of `id`. Running work is allowed to
    /// complete: clean-up is deferred by [`EXPIRE_WAIT_SECS`] while the
    /// method reports it is still running. Returns false if the id is
    /// unknown.
    pub fn remove(&mut self, id: WorkId, now: i64, handler: &mut dyn RunHandler) -> bool {
        let Some(work) = self.table.get_mut(&id) else {
            debug!(id = %id, "work does not exist");
            return false;
        };
        work.expired = true;
        let phase = work.phase;
        let invoke = Arc::clone(&work.invoke);
        let has_isrunning = work.hooks.is_running;
        self.unschedule(id);

        if has_isrunning && handler.is_running(&invoke) {
            // Schedule a clean-up attempt; dispatch will find it expired.
            self.events.insert(
                EventKey {
                    due: now + EXPIRE_WAIT_SECS,
                    phase,
                    id,
                },
                (),
            );
            debug!(key = %invoke.key, "expired but removal delayed");
            return true;
        }

        self.finalise(id, handler);
        debug!(key = %invoke.key, "work removed by request");
        true
    }

    /// Stop dispatching and empty the event list. The work table is left
    /// alone so [`enable`](Self::enable) can repopulate the schedule.
    pub fn disable(&mut self) {
        debug!("draining run queue");
        self.drain = true;
        self.events.clear();
    }

    /// Resume dispatching, rescheduling every table record from now.
    pub fn enable(&mut self, now: i64) {
        debug!("enabling run queue");
        self.drain = false;
        self.events.clear();
        let ids: Vec<WorkId> = self.table.keys().copied().collect();
        for id in ids {
            self.sched_insert(id, 0, now);
        }
    }

    /// Earliest pending event time.
    pub fn next_deadline(&self) -> Option<i64> {
        self.events.first_key_value().map(|(k, _)| k.due)
    }

    /// Seconds until the next event, lower bound one second.
    pub fn next_delta(&self, now: i64) -> Option<i64> {
        self.next_deadline().map(|due| (due - now).max(1))
    }

    /// Number of non-expired records in the work table.
    pub fn active_work(&self) -> usize {
        self.table.values().filter(|w| !w.expired).count()
    }

    /// Number of non-expired records with a pending event.
    pub fn scheduled(&self) -> usize {
        self.events
            .keys()
            .filter(|k| self.table.get(&k.id).is_some_and(|w| !w.expired))
            .count()
    }

    /// Total records in the work table, expired included.
    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    #[cfg(test)]
    pub(crate) fn event_times(&self) -> Vec<i64> {
        self.events.keys().map(|k| k.due).collect()
    }

    #[cfg(test)]
    pub(crate) fn is_expired(&self, id: WorkId) -> Option<bool> {
        self.table.get(&id).map(|w| w.expired)
    }
}

#[cfg(test)]
#[path = "runq_tests.rs"]
mod tests;
