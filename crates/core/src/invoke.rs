// SPDX-License-Identifier: MIT

//! Invocation record binding a scheduled piece of work to a method and its
//! I/O destinations.
//!
//! The key is the join between the run queue, the method executor and the
//! job layer, and must be unique per concurrently-scheduled work item: it
//! names the run-set while a series of executions is in flight.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    /// Unique identifier of this invocation series.
    pub key: String,
    /// Name of the registered method that performs the work.
    pub method: String,
    /// Command string handed to the method.
    pub command: String,
    /// Route receiving result data (child stdout).
    pub result_url: String,
    /// Route receiving error data (child stderr).
    pub error_url: String,
    /// Retention hint for ring destinations.
    pub keep: i64,
}

impl Invocation {
    pub fn new(
        key: impl Into<String>,
        method: impl Into<String>,
        command: impl Into<String>,
        result_url: impl Into<String>,
        error_url: impl Into<String>,
        keep: i64,
    ) -> Self {
        Self {
            key: key.into(),
            method: method.into(),
            command: command.into(),
            result_url: result_url.into(),
            error_url: error_url.into(),
            keep,
        }
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} `{}`)", self.key, self.method, self.command)
    }
}
