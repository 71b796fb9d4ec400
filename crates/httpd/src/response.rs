// SPDX-License-Identifier: MIT

//! Response assembly.

use cw_core::time_fmt::http_date;

/// What a path handler returns.
#[derive(Debug, Default)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    /// Extra outbound headers. A `Status` header overrides the numeric
    /// status; a `Location` header forces 302.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Epoch seconds for a `Last-Modified` header.
    pub last_modified: Option<i64>,
}

impl Response {
    pub fn html(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: Some("text/html".to_string()),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn text(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: Some("text/plain".to_string()),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn error(status: u16, text: &str) -> Self {
        let title = status_title(status);
        Self {
            status,
            content_type: Some("text/html".to_string()),
            body: format!(
                "<html><head><title>{status} {title}</title></head>\n\
                 <body><h2>{status} {title}</h2>\n{text}\n</body></html>\n"
            )
            .into_bytes(),
            ..Default::default()
        }
    }

    pub fn not_found(path: &str) -> Self {
        Self::error(404, &format!("path '{path}' is not served here"))
    }
}

/// Serialise status line and headers, honouring the `Status` and
/// `Location` overrides, and append the body.
pub(crate) fn write_response(resp: &Response, now: i64, head_only: bool) -> Vec<u8> {
    let mut status = resp.status;
    if resp
        .headers
        .iter()
        .any(|(n, _)| n.eq_ignore_ascii_case("location"))
    {
        status = 302;
    }
    if let Some((_, v)) = resp
        .headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("status"))
    {
        if let Ok(n) = v
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .parse::<u16>()
        {
            status = n;
        }
    }

    let mut out = String::new();
    out.push_str(&format!("HTTP/1.0 {} {}\r\n", status, status_title(status)));
    for (name, value) in &resp.headers {
        if name.eq_ignore_ascii_case("status") {
            continue;
        }
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!(
        "Server: clockwork/{}\r\n",
        env!("CARGO_PKG_VERSION")
    ));
    out.push_str(&format!("Date: {}\r\n", http_date(now)));
    if let Some(ct) = &resp.content_type {
        out.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n", resp.body.len()));
    if let Some(modt) = resp.last_modified {
        out.push_str(&format!("Last-Modified: {}\r\n", http_date(modt)));
    }
    out.push_str("Connection: close\r\n\r\n");

    let mut bytes = out.into_bytes();
    if !head_only {
        bytes.extend_from_slice(&resp.body);
    }
    bytes
}

pub(crate) fn status_title(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Time-out",
        411 => "Length Required",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Something",
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
