// SPDX-License-Identifier: MIT

//! Shared time formatting helpers.

use chrono::{DateTime, TimeZone, Utc};

/// Format seconds as a short human-readable duration: `"5s"`, `"2m"`,
/// `"1h30m"`, `"3d"`.
pub fn format_elapsed(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        if m > 0 {
            format!("{}h{}m", h, m)
        } else {
            format!("{}h", h)
        }
    } else {
        format!("{}d", secs / 86400)
    }
}

/// RFC 1123 date for HTTP headers, e.g. `"Sun, 06 Nov 1994 08:49:37 GMT"`.
pub fn http_date(epoch_secs: i64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_opt(epoch_secs, 0)
        .single()
        .unwrap_or_default();
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
#[path = "time_fmt_tests.rs"]
mod tests;
