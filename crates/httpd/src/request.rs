// SPDX-License-Identifier: MIT

//! HTTP request parsing.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Head,
}

/// A parsed request as handed to path handlers.
#[derive(Debug)]
pub struct Request {
    pub method: HttpMethod,
    /// Percent-decoded path.
    pub path: String,
    /// Length of the matched path-table prefix.
    pub matched: usize,
    /// Header names lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    /// The path remainder after the matched prefix.
    pub fn trailing(&self) -> &str {
        self.path.get(self.matched..).unwrap_or("")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Produces a 501 response.
    #[error("method not implemented")]
    UnknownMethod,
    /// Produces a 400 response.
    #[error("bad request path")]
    BadPath,
    /// The header block never parses; the connection just closes.
    #[error("malformed request")]
    Malformed,
}

/// Parse the request head: request line plus header block.
///
/// Returns (method, decoded path, headers).
pub(crate) fn parse_head(
    head: &str,
) -> Result<(HttpMethod, String, HashMap<String, String>), ParseError> {
    let mut lines = head.lines();
    let request_line = lines.next().ok_or(ParseError::Malformed)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(ParseError::Malformed)?;
    let raw_path = parts.next().ok_or(ParseError::Malformed)?;
    let version = parts.next().ok_or(ParseError::Malformed)?;

    if !version.starts_with("HTTP/1.") {
        return Err(ParseError::Malformed);
    }
    let method = match method {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "HEAD" => HttpMethod::Head,
        _ => return Err(ParseError::UnknownMethod),
    };

    let path = percent_decode(raw_path).ok_or(ParseError::BadPath)?;
    if !path.starts_with('/') {
        return Err(ParseError::BadPath);
    }

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    Ok((method, path, headers))
}

/// Decode `%xx` escapes; `None` on a truncated or non-hex escape.
pub(crate) fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
