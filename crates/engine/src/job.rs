// SPDX-License-Identifier: MIT

//! Job layer: binds job-table rows to run-queue work executed by the
//! method executor.
//!
//! A job table is text: a magic first line `job 1`, then one record per
//! line of eleven whitespace-separated fields — start, interval, phase,
//! count, key, origin, result route, error route, keep, method, command —
//! with the command as the whitespace-containing tail. Key, routes and
//! command undergo `%x` template expansion. Each row validates
//! independently: a bad number or unknown method skips the row with an
//! error and the rest continue.

use crate::meth::Registry;
use crate::runq::{Added, HookSet, RunQueue, RunqError, WorkSpec};
use cw_core::{Invocation, ShortId, WorkId};
use cw_route::{expand, ExpandContext, RouteError, Router};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("no method in job '{0}'")]
    NoMethod(String),
    #[error("unknown method '{method}' in job '{key}'")]
    UnknownMethod { method: String, key: String },
    #[error(transparent)]
    Runq(#[from] RunqError),
    #[error("job table '{url}' is unreadable: {source}")]
    Unreadable {
        url: String,
        #[source]
        source: RouteError,
    },
    #[error("job table '{0}' lacks the 'job 1' magic header")]
    BadMagic(String),
}

/// One row of the job table, as accepted.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Start offset in seconds relative to the job layer's start time;
    /// may be negative for backfill.
    pub start: i64,
    pub interval: i64,
    pub phase: i64,
    pub count: i64,
    pub key: String,
    pub origin: String,
    pub result_url: String,
    pub error_url: String,
    pub keep: i64,
    pub method: String,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAdded {
    Scheduled(WorkId),
    /// The schedule was exhausted within the call; no bookkeeping row.
    Completed,
}

/// Bookkeeping for a live job.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub origin: String,
    pub invoke: Invocation,
    pub work: WorkId,
}

pub struct JobTable {
    start_t: i64,
    rows: Vec<JobRow>,
}

impl JobTable {
    pub fn new(start_t: i64) -> Self {
        Self {
            start_t,
            rows: Vec::new(),
        }
    }

    /// The instant job starts are measured from.
    pub fn start_time(&self) -> i64 {
        self.start_t
    }

    pub fn rows(&self) -> &[JobRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Accept a job: resolve the method, pack the invocation, submit the
    /// work with the executor's callbacks wired in.
    pub fn add(
        &mut self,
        runq: &mut RunQueue,
        registry: &Registry,
        now: i64,
        spec: JobSpec,
    ) -> Result<JobAdded, JobError> {
        if spec.method.is_empty() {
            return Err(JobError::NoMethod(spec.key));
        }
        if !registry.check(&spec.method) {
            return Err(JobError::UnknownMethod {
                method: spec.method,
                key: spec.key,
            });
        }

        let invoke = Invocation::new(
            &spec.key,
            &spec.method,
            &spec.command,
            &spec.result_url,
            &spec.error_url,
            spec.keep,
        );
        debug!(
            key = %spec.key, origin = %spec.origin, method = %spec.method,
            start = spec.start, interval = spec.interval, phase = spec.phase,
            count = spec.count, command = %spec.command.short(48), "job added"
        );

        let work = WorkSpec {
            start: self.start_t + spec.start,
            interval: spec.interval,
            phase: spec.phase,
            count: spec.count,
            key: spec.key.clone(),
            hooks: HookSet::all(),
            invoke: invoke.clone(),
        };
        match runq.add(work, now)? {
            Added::Scheduled(id) => {
                self.rows.push(JobRow {
                    origin: spec.origin,
                    invoke,
                    work: id,
                });
                Ok(JobAdded::Scheduled(id))
            }
            Added::Completed => Ok(JobAdded::Completed),
        }
    }

    /// Drop the bookkeeping row for an expired work id. Registered
    /// against `runq.expired` by the engine.
    pub fn remove_row(&mut self, work: WorkId) -> Option<JobRow> {
        let pos = self.rows.iter().position(|r| r.work == work)?;
        let row = self.rows.remove(pos);
        debug!(key = %row.invoke.key, work = %work, "job finished");
        Some(row)
    }

    /// Load a job table from a route. Returns the number of rows added;
    /// an unreadable route or missing magic is an error, a bad row is
    /// not.
    pub fn load_route(
        &mut self,
        runq: &mut RunQueue,
        registry: &Registry,
        router: &Router,
        base_cx: &ExpandContext,
        url: &str,
        now: i64,
    ) -> Result<usize, JobError> {
        let text = router
            .open(url, 0)
            .and_then(|mut r| r.read_all())
            .map_err(|source| JobError::Unreadable {
                url: url.to_string(),
                source,
            })?;
        let text = String::from_utf8_lossy(&text).into_owned();

        let mut lines = text.lines().enumerate();
        match lines.next() {
            Some((_, magic)) if magic.trim() == "job 1" => {}
            _ => return Err(JobError::BadMagic(url.to_string())),
        }

        let mut added = 0;
        for (lineno, line) in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((fields, command)) = split_row(line) else {
                error!(url, row = lineno + 1, "row does not have 11 fields, skipping");
                continue;
            };

            let mut numbers = [0i64; 4];
            let mut bad = None;
            for (i, (slot, name)) in numbers
                .iter_mut()
                .zip(["start", "interval", "phase", "count"])
                .enumerate()
            {
                match fields[i].parse::<i64>() {
                    Ok(v) => *slot = v,
                    Err(_) => {
                        bad = Some((name, fields[i]));
                        break;
                    }
                }
            }
            let keep = match fields[8].parse::<i64>() {
                Ok(v) => v,
                Err(_) => {
                    bad = Some(("keep", fields[8]));
                    0
                }
            };
            if let Some((name, value)) = bad {
                error!(url, row = lineno + 1, field = name, value, "bad number, skipping row");
                continue;
            }
            let [start, interval, phase, count] = numbers;

            // Expand the key against itself, then the rest against the
            // expanded key.
            let mut cx = base_cx.clone();
            cx.interval = interval;
            cx.job = fields[4].to_string();
            let key = expand(fields[4], &cx);
            cx.job = key.clone();

            let spec = JobSpec {
                start,
                interval,
                phase,
                count,
                key,
                origin: fields[5].to_string(),
                result_url: expand(fields[6], &cx),
                error_url: expand(fields[7], &cx),
                keep,
                method: fields[9].to_string(),
                command: expand(command, &cx),
            };
            match self.add(runq, registry, now, spec) {
                Ok(_) => added += 1,
                Err(e) => error!(url, row = lineno + 1, error = %e, "cannot add job, skipping"),
            }
        }
        Ok(added)
    }
}

/// Split a record into its ten leading fields and the trailing command.
fn split_row(line: &str) -> Option<([&str; 10], &str)> {
    let mut rest = line.trim_start();
    let mut fields = [""; 10];
    for slot in fields.iter_mut() {
        let end = rest.find(char::is_whitespace)?;
        *slot = &rest[..end];
        rest = rest[end..].trim_start();
    }
    if rest.is_empty() {
        None
    } else {
        Some((fields, rest.trim_end()))
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
