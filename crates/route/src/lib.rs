// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cw-route: application-addressable I/O endpoints.
//!
//! A route is named by a pseudo-URL `<driver>:<opaque>`. The engine only
//! consumes the narrow contract below — open, write, flush, whole-read,
//! `tell` and sequenced read — so the substrate stays replaceable. The
//! drivers implemented here are the subset the agent needs to run: plain
//! files (`file:`, `filea:`, `fileov:`), the standard streams (`stdin:`,
//! `stdout:`, `stderr:`) and the sequenced ring store (`rs:`, `local:`).
//! The remaining driver names from the wider family parse but report
//! unsupported.

pub mod expand;
mod file;
pub mod ring;
mod std_stream;

pub use expand::{expand, ExpandContext};
pub use ring::{RingEntry, RingStore};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route '{0}' has no driver prefix")]
    NoDriver(String),
    #[error("driver '{driver}' is not supported here ({url})")]
    Unsupported { driver: String, url: String },
    #[error("route '{url}': {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ring route '{0}' wants <path>,<ring>[,seq]")]
    BadRingUrl(String),
    #[error("route '{url}': {message}")]
    Format { url: String, message: String },
    #[error("route '{0}' is not readable")]
    NotReadable(String),
    #[error("route '{0}' does not keep sequence state")]
    NotSequenced(String),
}

/// Position report for sequenced routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tell {
    /// Highest sequence number present (0 when empty).
    pub seq: u64,
    /// Size in bytes of the backing object.
    pub size: u64,
    /// Last-modified time, epoch seconds.
    pub modified: i64,
}

/// An open route.
pub trait Route: Send {
    /// The pseudo-URL this route was opened from.
    fn url(&self) -> &str;

    /// Append data to the route.
    fn write(&mut self, data: &[u8]) -> Result<usize, RouteError>;

    /// Push buffered data to the backing object.
    fn flush(&mut self) -> Result<(), RouteError>;

    /// Read the entire current contents.
    fn read_all(&mut self) -> Result<Vec<u8>, RouteError> {
        Err(RouteError::NotReadable(self.url().to_string()))
    }

    /// Sequence/size/modified report; sequenced routes only.
    fn tell(&self) -> Result<Tell, RouteError> {
        Err(RouteError::NotSequenced(self.url().to_string()))
    }

    /// Entries with sequence strictly greater than `seq`; sequenced
    /// routes only.
    fn read_from(&mut self, _seq: u64) -> Result<Vec<RingEntry>, RouteError> {
        Err(RouteError::NotSequenced(self.url().to_string()))
    }
}

/// Driver names reserved by the wider route family but not implemented by
/// this agent. They parse, and open reports them unsupported.
const RESERVED_DRIVERS: &[&str] = &["grs", "http", "https", "sqlrs", "localmeta"];

/// Opens routes, carrying the per-agent context the `local:` driver needs.
#[derive(Debug, Clone)]
pub struct Router {
    var_dir: PathBuf,
    host: String,
}

impl Router {
    pub fn new(var_dir: PathBuf, host: impl Into<String>) -> Self {
        Self {
            var_dir,
            host: host.into(),
        }
    }

    pub fn var_dir(&self) -> &PathBuf {
        &self.var_dir
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Path of this host's ring store under the var directory.
    pub fn local_store(&self) -> PathBuf {
        self.var_dir.join(format!("{}.rs", self.host))
    }

    /// Open a route by pseudo-URL.
    ///
    /// `keep` is the retention hint for ring destinations: keep at most
    /// that many recent entries (0 = unbounded).
    pub fn open(&self, url: &str, keep: i64) -> Result<Box<dyn Route>, RouteError> {
        let (driver, rest) = url
            .split_once(':')
            .ok_or_else(|| RouteError::NoDriver(url.to_string()))?;
        match driver {
            "file" => file::FileRoute::open(url, rest, file::Mode::Plain),
            "filea" => file::FileRoute::open(url, rest, file::Mode::Append),
            "fileov" => file::FileRoute::open(url, rest, file::Mode::Overwrite),
            "stdin" => Ok(std_stream::stdin(url)),
            "stdout" => Ok(std_stream::stdout(url)),
            "stderr" => Ok(std_stream::stderr(url)),
            "rs" => ring::RingRoute::open(url, rest, keep),
            "local" => {
                let ring = trim_ring_name(rest);
                let spec = format!("{},{}", self.local_store().display(), ring);
                ring::RingRoute::open(url, &spec, keep)
            }
            d if RESERVED_DRIVERS.contains(&d) => Err(RouteError::Unsupported {
                driver: d.to_string(),
                url: url.to_string(),
            }),
            _ => Err(RouteError::NoDriver(url.to_string())),
        }
    }

    /// Can the route be opened and read right now?
    pub fn readable(&self, url: &str) -> bool {
        match self.open(url, 0) {
            Ok(mut route) => route.read_all().is_ok(),
            Err(_) => false,
        }
    }
}

/// Ring names arrive from URLs with decorations: an optional leading comma
/// and surplus slashes are stripped.
pub fn trim_ring_name(name: &str) -> &str {
    name.trim_start_matches(',').trim_matches('/')
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
