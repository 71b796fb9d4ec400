// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cw-httpd: the embedded HTTP daemon.
//!
//! A deliberately small server: HTTP/1.0 and 1.1, GET/POST/HEAD, one
//! connection serviced at a time per listener, every response closed when
//! written. Paths dispatch by first prefix match in insertion order. Each
//! accepted connection is announced to the engine's relay as an
//! `httpd.accept` event before it is served.

pub mod handlers;
mod request;
mod response;
mod server;

pub use handlers::{register_builtin_paths, AgentInfo};
pub use request::{HttpMethod, Request};
pub use response::Response;
pub use server::{Httpd, HttpdError};

/// Event raised on the callback bus per accepted connection; payload is
/// the connection's descriptor.
pub const CB_ACCEPT: &str = "httpd.accept";

/// Well-known agent port.
pub const DEFAULT_PORT: u16 = 8096;
