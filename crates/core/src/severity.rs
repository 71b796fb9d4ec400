// SPDX-License-Identifier: MIT

//! Severity ladder for operational reporting.
//!
//! Six levels in escalating order. The first four map onto `tracing`
//! levels; `Fatal` means the operation was abandoned but the process
//! continues, `Die` means the process terminates.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Visible only in debug runs.
    Diag,
    /// Normal operational narration.
    Info,
    /// Recoverable inconsistency.
    Warning,
    /// User-visible failure; the operation is retained.
    Error,
    /// Operation abandoned, caller notified.
    Fatal,
    /// The process terminates.
    Die,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Diag => "diag",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
            Severity::Die => "die",
        }
    }

    /// All levels, lowest first. The `/elog` table iterates this.
    pub fn all() -> [Severity; 6] {
        [
            Severity::Diag,
            Severity::Info,
            Severity::Warning,
            Severity::Error,
            Severity::Fatal,
            Severity::Die,
        ]
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "diag" | "debug" => Ok(Severity::Diag),
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "fatal" => Ok(Severity::Fatal),
            "die" => Ok(Severity::Die),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
