// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cw-agent: configuration and host plumbing for the clockwork binaries.

pub mod config;
pub mod host;

pub use config::{Config, ConfigError, Paths};
