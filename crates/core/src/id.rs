// SPDX-License-Identifier: MIT

//! Identifier types.

use serde::{Deserialize, Serialize};

/// Trait for truncating identifiers to a short prefix in log output.
pub trait ShortId {
    /// Returns a string slice truncated to at most `n` characters.
    fn short(&self, n: usize) -> &str;
}

impl ShortId for str {
    fn short(&self, n: usize) -> &str {
        if self.len() <= n {
            self
        } else {
            &self[..n]
        }
    }
}

/// Identifier of a work record in the run queue.
///
/// Ids are allocated from a monotonic counter and are stable for the life
/// of the work; an id is never reused for a given work item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct WorkId(pub i64);

impl WorkId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for WorkId {
    fn from(n: i64) -> Self {
        Self(n)
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
