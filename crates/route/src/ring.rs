// SPDX-License-Identifier: MIT

//! Sequenced ring store and the `rs:` route driver.
//!
//! A store file holds any number of named rings as JSON lines:
//! `{"ring":"cpu","seq":3,"time":1700000000,"text":"..."}`. Sequence
//! numbers are monotonic per ring and never reused; retention trims the
//! oldest entries of a ring past its keep count. The whole file is scanned
//! per operation — stores are small and the scan keeps the format
//! crash-tolerant (a torn trailing line is ignored).
//!
//! URL shape: `rs:<path>,<ring>[,seq]` — the optional sequence is a start
//! position for sequenced reads.

use crate::{Route, RouteError, Tell};
use cw_core::Table;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One stored sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingEntry {
    pub ring: String,
    pub seq: u64,
    /// Epoch seconds at append time.
    pub time: i64,
    pub text: String,
}

impl RingEntry {
    /// Parse the payload as a tab-separated table.
    pub fn table(&self) -> Option<Table> {
        Table::from_tsv(&self.text).ok()
    }
}

/// A ring store file.
#[derive(Debug, Clone)]
pub struct RingStore {
    path: PathBuf,
}

impl RingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io(&self, source: std::io::Error) -> RouteError {
        RouteError::Io {
            url: format!("rs:{}", self.path.display()),
            source,
        }
    }

    fn scan(&self) -> Result<Vec<RingEntry>, RouteError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io(e)),
        };
        let mut entries = Vec::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RingEntry>(line) {
                Ok(entry) => entries.push(entry),
                // Torn or foreign line; skip it.
                Err(_) => tracing::debug!(path = %self.path.display(), "skipping corrupt ring line"),
            }
        }
        Ok(entries)
    }

    fn rewrite(&self, entries: &[RingEntry]) -> Result<(), RouteError> {
        let mut out = String::new();
        for entry in entries {
            match serde_json::to_string(entry) {
                Ok(line) => {
                    out.push_str(&line);
                    out.push('\n');
                }
                Err(e) => {
                    return Err(RouteError::Format {
                        url: format!("rs:{}", self.path.display()),
                        message: e.to_string(),
                    })
                }
            }
        }
        std::fs::write(&self.path, out).map_err(|e| self.io(e))
    }

    /// Distinct ring names in the store, in first-seen order.
    pub fn rings(&self) -> Result<Vec<String>, RouteError> {
        let mut names: Vec<String> = Vec::new();
        for entry in self.scan()? {
            if !names.contains(&entry.ring) {
                names.push(entry.ring);
            }
        }
        Ok(names)
    }

    /// All entries of one ring, sequence order.
    pub fn entries(&self, ring: &str) -> Result<Vec<RingEntry>, RouteError> {
        let mut entries: Vec<RingEntry> =
            self.scan()?.into_iter().filter(|e| e.ring == ring).collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    /// Entries of one ring with sequence strictly greater than `seq`.
    pub fn entries_after(&self, ring: &str, seq: u64) -> Result<Vec<RingEntry>, RouteError> {
        Ok(self
            .entries(ring)?
            .into_iter()
            .filter(|e| e.seq > seq)
            .collect())
    }

    /// Append a sample, trimming the ring to `keep` recent entries
    /// (0 = unbounded). Returns the assigned sequence number.
    pub fn append(&self, ring: &str, text: &str, keep: i64) -> Result<u64, RouteError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io(e))?;
        }
        let seq = self.tell(ring)?.seq + 1;
        let entry = RingEntry {
            ring: ring.to_string(),
            seq,
            time: chrono::Utc::now().timestamp(),
            text: text.to_string(),
        };
        let line = serde_json::to_string(&entry).map_err(|e| RouteError::Format {
            url: format!("rs:{}", self.path.display()),
            message: e.to_string(),
        })?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io(e))?;
        writeln!(file, "{line}").map_err(|e| self.io(e))?;

        if keep > 0 {
            self.trim(ring, keep as usize)?;
        }
        Ok(seq)
    }

    fn trim(&self, ring: &str, keep: usize) -> Result<(), RouteError> {
        let entries = self.scan()?;
        let in_ring = entries.iter().filter(|e| e.ring == ring).count();
        if in_ring <= keep {
            return Ok(());
        }
        let mut drop = in_ring - keep;
        let kept: Vec<RingEntry> = entries
            .into_iter()
            .filter(|e| {
                if e.ring == ring && drop > 0 {
                    drop -= 1;
                    false
                } else {
                    true
                }
            })
            .collect();
        self.rewrite(&kept)
    }

    /// Sequence/size/modified report for one ring.
    pub fn tell(&self, ring: &str) -> Result<Tell, RouteError> {
        let seq = self
            .scan()?
            .iter()
            .filter(|e| e.ring == ring)
            .map(|e| e.seq)
            .max()
            .unwrap_or(0);
        let (size, modified) = match std::fs::metadata(&self.path) {
            Ok(meta) => {
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                (meta.len(), modified)
            }
            Err(_) => (0, 0),
        };
        Ok(Tell {
            seq,
            size,
            modified,
        })
    }
}

/// The `rs:` driver.
pub(crate) struct RingRoute {
    url: String,
    store: RingStore,
    ring: String,
    keep: i64,
}

impl RingRoute {
    pub(crate) fn open(url: &str, rest: &str, keep: i64) -> Result<Box<dyn Route>, RouteError> {
        let mut parts = rest.splitn(3, ',');
        let path = parts.next().unwrap_or_default();
        let ring = parts.next().unwrap_or_default();
        if path.is_empty() || ring.is_empty() {
            return Err(RouteError::BadRingUrl(url.to_string()));
        }
        Ok(Box::new(Self {
            url: url.to_string(),
            store: RingStore::new(path),
            ring: ring.to_string(),
            keep,
        }))
    }
}

impl Route for RingRoute {
    fn url(&self) -> &str {
        &self.url
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, RouteError> {
        let text = String::from_utf8_lossy(data);
        self.store.append(&self.ring, &text, self.keep)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), RouteError> {
        Ok(())
    }

    fn read_all(&mut self) -> Result<Vec<u8>, RouteError> {
        let mut out = Vec::new();
        for entry in self.store.entries(&self.ring)? {
            out.extend_from_slice(entry.text.as_bytes());
        }
        Ok(out)
    }

    fn tell(&self) -> Result<Tell, RouteError> {
        self.store.tell(&self.ring)
    }

    fn read_from(&mut self, seq: u64) -> Result<Vec<RingEntry>, RouteError> {
        self.store.entries_after(&self.ring, seq)
    }
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;
