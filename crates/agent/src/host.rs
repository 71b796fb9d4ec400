// SPDX-License-Identifier: MIT

//! Host facts for route addressing and the `/info` endpoint.

/// Short hostname; `localhost` when the system will not say.
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| h.split('.').next().unwrap_or(&h).to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

pub fn os() -> String {
    std::env::consts::OS.to_string()
}

pub fn machine() -> String {
    std::env::consts::ARCH.to_string()
}

/// Local timezone abbreviation, e.g. `UTC` or `+02:00`.
pub fn timezone() -> String {
    chrono::Local::now().format("%Z").to_string()
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
