// SPDX-License-Identifier: MIT

//! Cascade sampler.
//!
//! The `sample` method consumes a source ring of tabular samples and
//! emits one reduced table per span and evaluation window. A span is a
//! run of contiguous entries whose column metadata is identical; columns
//! reduce according to the configured function and each column's sense —
//! `abs` values reduce directly, `cnt` counters reduce by difference,
//! with a negative difference treated as a counter wrap. Reduced tables
//! carry `abs` columns only.
//!
//! Command shape: `<function> <source-route>` with function one of
//! avg, min, max, sum, last, rate.

use crate::meth::SourceMethod;
use cw_core::{Column, ColumnSense, Table};
use cw_route::{Route, Router};
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeFn {
    Avg,
    Min,
    Max,
    Sum,
    Last,
    Rate,
}

impl std::str::FromStr for CascadeFn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" => Ok(CascadeFn::Avg),
            "min" => Ok(CascadeFn::Min),
            "max" => Ok(CascadeFn::Max),
            "sum" => Ok(CascadeFn::Sum),
            "last" => Ok(CascadeFn::Last),
            "rate" => Ok(CascadeFn::Rate),
            other => Err(format!("unknown cascade function '{other}'")),
        }
    }
}

/// The `sample` source method.
pub struct Cascade {
    router: Arc<Router>,
    func: Option<CascadeFn>,
    source_url: Option<String>,
    last_seq: u64,
}

impl Cascade {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            func: None,
            source_url: None,
            last_seq: 0,
        }
    }
}

impl SourceMethod for Cascade {
    fn before_run(&mut self, command: &str, _res: &mut dyn Route, _err: &mut dyn Route) -> i32 {
        let mut parts = command.split_whitespace();
        let func = match parts.next().map(str::parse::<CascadeFn>) {
            Some(Ok(func)) => func,
            _ => {
                error!(command, "sample wants '<function> <source-route>'");
                return -1;
            }
        };
        let Some(url) = parts.next() else {
            error!(command, "sample wants a source route");
            return -1;
        };

        self.func = Some(func);
        self.source_url = Some(url.to_string());
        self.last_seq = self
            .router
            .open(url, 0)
            .and_then(|r| r.tell())
            .map(|t| t.seq)
            .unwrap_or(0);
        0
    }

    fn action(&mut self, _command: &str, res: &mut dyn Route, _err: &mut dyn Route) -> i32 {
        let (Some(func), Some(url)) = (self.func, self.source_url.as_deref()) else {
            return -1;
        };
        let mut route = match self.router.open(url, 0) {
            Ok(route) => route,
            Err(e) => {
                error!(url, error = %e, "sample source not openable");
                return -1;
            }
        };
        let entries = match route.read_from(self.last_seq) {
            Ok(entries) => entries,
            Err(e) => {
                error!(url, error = %e, "sample source not readable");
                return -1;
            }
        };
        if entries.is_empty() {
            // Nothing new; emit nothing.
            return 0;
        }

        // Group contiguous entries of identical shape into spans.
        let mut spans: Vec<Vec<(i64, Table)>> = Vec::new();
        for entry in &entries {
            self.last_seq = self.last_seq.max(entry.seq);
            let Some(table) = entry.table() else {
                warn!(url, seq = entry.seq, "skipping non-tabular sample");
                continue;
            };
            match spans.last_mut() {
                Some(span) if span[0].1.same_shape(&table) => span.push((entry.time, table)),
                _ => spans.push(vec![(entry.time, table)]),
            }
        }

        for span in &spans {
            let Some(reduced) = reduce(func, span) else {
                continue;
            };
            debug!(url, samples = span.len(), "emitting reduced span");
            if res.write(reduced.to_tsv().as_bytes()).is_err() {
                error!(url, "cannot write reduced sample");
                return -1;
            }
        }
        0
    }
}

/// Reduce one span of samples to a single table.
///
/// Rows align by index across the span (short tables bound the row
/// count); a cell that fails to parse as a number passes through from the
/// final sample.
pub fn reduce(func: CascadeFn, span: &[(i64, Table)]) -> Option<Table> {
    let (first_time, first) = span.first()?;
    let (last_time, last) = span.last()?;
    let elapsed = (last_time - first_time) as f64;
    let nrows = span.iter().map(|(_, t)| t.rows.len()).min()?;
    let n = span.len() as f64;

    let mut out = Table::new(
        first
            .columns
            .iter()
            .map(|c| Column::abs(c.name.clone()))
            .collect(),
    );
    for row in 0..nrows {
        let mut cells = Vec::with_capacity(first.columns.len());
        for (ci, col) in first.columns.iter().enumerate() {
            let values: Option<Vec<f64>> = span
                .iter()
                .map(|(_, t)| t.rows[row][ci].trim().parse::<f64>().ok())
                .collect();
            let cell = match values {
                Some(values) => fmt_num(reduce_column(func, col.sense, &values, n, elapsed)),
                None => last.rows[row][ci].clone(),
            };
            cells.push(cell);
        }
        out.push_row(cells).ok()?;
    }
    Some(out)
}

fn reduce_column(func: CascadeFn, sense: ColumnSense, values: &[f64], n: f64, elapsed: f64) -> f64 {
    let first = values[0];
    let last = values[values.len() - 1];
    let sum: f64 = values.iter().sum();
    match (func, sense) {
        (CascadeFn::Avg, _) => sum / n,
        (CascadeFn::Min, _) => values.iter().copied().fold(f64::INFINITY, f64::min),
        (CascadeFn::Max, _) => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        (CascadeFn::Sum, ColumnSense::Abs) => sum,
        (CascadeFn::Sum, ColumnSense::Cnt) => last - first,
        (CascadeFn::Last, _) => last,
        (CascadeFn::Rate, ColumnSense::Abs) => {
            if elapsed > 0.0 {
                sum / elapsed
            } else {
                last
            }
        }
        (CascadeFn::Rate, ColumnSense::Cnt) => {
            let diff = last - first;
            if diff < 0.0 {
                // Counter wrapped; substitute the final value.
                last
            } else if elapsed > 0.0 {
                diff / elapsed
            } else {
                last
            }
        }
    }
}

fn fmt_num(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        let s = format!("{v:.6}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
#[path = "cascade_tests.rs"]
mod tests;
