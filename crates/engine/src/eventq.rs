// SPDX-License-Identifier: MIT

//! Event-queue processor.
//!
//! The `event` method tails one or more route-addressed queues. Each
//! action pass checks every tracked route's sequence; new entries are
//! parsed as `<method> <command>` lines — `%` delimits body lines and
//! `\%` preserves a literal percent — and become one-off jobs whose key
//! derives from the route and sequence, so a retried pass submits the
//! same key rather than a duplicate.
//!
//! The method cannot reach the job layer directly (it runs inside a
//! dispatch pass), so submissions land on the [`EventSpool`] and the
//! engine drains the spool once the pass is over.

use crate::meth::SourceMethod;
use cw_route::{Route, Router};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error};

/// Retention hint for event-submitted jobs.
pub const EVENT_KEEP: i64 = 100;

/// A one-off job waiting for the engine to submit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    pub key: String,
    pub method: String,
    pub command: String,
    pub result_url: String,
    pub error_url: String,
}

/// Submissions queued by source methods, drained by the engine.
#[derive(Clone, Default)]
pub struct EventSpool {
    pending: Arc<Mutex<Vec<PendingJob>>>,
}

impl EventSpool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: PendingJob) {
        self.pending.lock().push(job);
    }

    pub fn drain(&self) -> Vec<PendingJob> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

struct Track {
    url: String,
    /// Highest sequence already processed; -1 when the route could not
    /// be opened yet.
    last_seq: i64,
}

/// The `event` source method.
pub struct EventWatch {
    router: Arc<Router>,
    spool: EventSpool,
    tracked: Vec<Track>,
}

impl EventWatch {
    pub fn new(router: Arc<Router>, spool: EventSpool) -> Self {
        Self {
            router,
            spool,
            tracked: Vec::new(),
        }
    }

    fn poll_route(&self, track: &mut Track, res_url: &str, err_url: &str) {
        let mut route = match self.router.open(&track.url, 0) {
            Ok(route) => route,
            // Recoverable: try again next pass.
            Err(e) => {
                debug!(url = %track.url, error = %e, "event queue not openable");
                return;
            }
        };
        let tell = match route.tell() {
            Ok(t) => t,
            Err(e) => {
                error!(url = %track.url, error = %e, "event queue tell failed");
                return;
            }
        };
        if (tell.seq as i64) <= track.last_seq {
            return;
        }

        let from = track.last_seq.max(0) as u64;
        let entries = match route.read_from(from) {
            Ok(entries) => entries,
            Err(e) => {
                error!(url = %track.url, error = %e, "unable to read changed items");
                return;
            }
        };
        for entry in entries {
            match parse_event_line(&entry.text) {
                Some(parsed) => {
                    if parsed.body.is_some() {
                        debug!(url = %track.url, seq = entry.seq, "event body lines ignored");
                    }
                    self.spool.push(PendingJob {
                        key: event_job_key(&track.url, entry.seq),
                        method: parsed.method,
                        command: parsed.command,
                        result_url: res_url.to_string(),
                        error_url: err_url.to_string(),
                    });
                }
                None => error!(url = %track.url, seq = entry.seq,
                               "unable to create event job for entry"),
            }
        }
        track.last_seq = tell.seq as i64;
    }
}

impl SourceMethod for EventWatch {
    fn before_run(&mut self, command: &str, _res: &mut dyn Route, _err: &mut dyn Route) -> i32 {
        let urls: Vec<&str> = command.split_whitespace().collect();
        if urls.is_empty() {
            error!("empty set of event routes");
            return -1;
        }
        self.tracked = urls
            .into_iter()
            .map(|url| {
                let last_seq = self
                    .router
                    .open(url, 0)
                    .and_then(|r| r.tell())
                    .map(|t| t.seq as i64)
                    .unwrap_or(-1);
                Track {
                    url: url.to_string(),
                    last_seq,
                }
            })
            .collect();
        0
    }

    fn action(&mut self, _command: &str, res: &mut dyn Route, err: &mut dyn Route) -> i32 {
        // Submissions inherit this run-set's routes.
        let (res_url, err_url) = (res.url().to_string(), err.url().to_string());
        let mut tracked = std::mem::take(&mut self.tracked);
        for track in &mut tracked {
            self.poll_route(track, &res_url, &err_url);
        }
        self.tracked = tracked;
        0
    }
}

struct ParsedEvent {
    method: String,
    command: String,
    body: Option<String>,
}

/// Translate an event line: `\%` is a literal percent, `%` starts a new
/// body line; the first word of the first line is the method, the rest of
/// it the command.
fn parse_event_line(text: &str) -> Option<ParsedEvent> {
    let mut unescaped = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('%') => unescaped.push('%'),
                Some(other) => {
                    unescaped.push('\\');
                    unescaped.push(other);
                }
                None => unescaped.push('\\'),
            },
            '%' => unescaped.push('\n'),
            c => unescaped.push(c),
        }
    }

    let mut lines = unescaped.splitn(2, '\n');
    let first = lines.next()?.trim();
    let body = lines.next().map(str::to_string);
    let (method, command) = match first.split_once(char::is_whitespace) {
        Some((m, c)) => (m.trim(), c.trim()),
        None => (first, ""),
    };
    if method.is_empty() {
        return None;
    }
    Some(ParsedEvent {
        method: method.to_string(),
        command: command.to_string(),
        body,
    })
}

/// Stable job key for an event entry.
fn event_job_key(url: &str, seq: u64) -> String {
    let tag: String = url
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
        .collect();
    format!("event-{tag}-{seq}")
}

#[cfg(test)]
#[path = "eventq_tests.rs"]
mod tests;
