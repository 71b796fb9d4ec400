// SPDX-License-Identifier: MIT

//! Agent configuration.
//!
//! TOML directives, all optional:
//!
//! ```toml
//! jobs = "file:%l/norm.jobs"
//!
//! [httpd]
//! interface = "127.0.0.1"
//! port = 8096
//! disable = false
//!
//! [elog]
//! above = "warning stderr:"
//! all = "none:"
//!
//! [route.sqlrs]
//! repository = "https://repo.example/put"
//! ```
//!
//! The `route.sqlrs` keys configure the repository driver, which this
//! agent does not ship; they are retained and surfaced by `/cf`.

use cw_core::Severity;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no home directory to anchor state under")]
    NoHome,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Route of the job table.
    pub jobs: Option<String>,
    #[serde(default)]
    pub httpd: HttpdConfig,
    /// Log routing: severity directive to route.
    #[serde(default)]
    pub elog: BTreeMap<String, String>,
    #[serde(default)]
    pub route: RouteConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct HttpdConfig {
    pub interface: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub disable: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RouteConfig {
    #[serde(default)]
    pub sqlrs: BTreeMap<String, String>,
}

impl Config {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Flattened name/value directives for the `/cf` endpoint.
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(jobs) = &self.jobs {
            out.push(("jobs".to_string(), jobs.clone()));
        }
        if let Some(interface) = &self.httpd.interface {
            out.push(("httpd.interface".to_string(), interface.clone()));
        }
        if let Some(port) = self.httpd.port {
            out.push(("httpd.port".to_string(), port.to_string()));
        }
        out.push(("httpd.disable".to_string(), self.httpd.disable.to_string()));
        for (name, value) in &self.elog {
            out.push((format!("elog.{name}"), value.clone()));
        }
        for (name, value) in &self.route.sqlrs {
            out.push((format!("route.sqlrs.{name}"), value.clone()));
        }
        out
    }

    /// Severity-to-route table for the `/elog` endpoint.
    ///
    /// `elog.all` routes every level; `elog.above = "<severity> <route>"`
    /// overrides from that level up. Unrouted levels fall back to
    /// `stderr:`.
    pub fn elog_table(&self) -> Vec<(String, String)> {
        let all = self.elog.get("all").cloned();
        let above = self.elog.get("above").and_then(|v| {
            let (sev, route) = v.split_once(' ')?;
            match sev.parse::<Severity>() {
                Ok(sev) => Some((sev, route.trim().to_string())),
                Err(e) => {
                    tracing::warn!(directive = v.as_str(), error = %e, "bad elog.above");
                    None
                }
            }
        });
        Severity::all()
            .iter()
            .map(|level| {
                let route = match &above {
                    Some((threshold, route)) if level >= threshold => route.clone(),
                    _ => all.clone().unwrap_or_else(|| "stderr:".to_string()),
                };
                (level.to_string(), route)
            })
            .collect()
    }
}

/// Filesystem layout of the agent.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Holds the per-host ring store and the agent log.
    pub var_dir: PathBuf,
    /// Holds configuration and standard job tables.
    pub lib_dir: PathBuf,
    pub lock_path: PathBuf,
    pub log_path: PathBuf,
    pub config_path: PathBuf,
}

impl Paths {
    /// Resolve under the XDG state and config homes; the
    /// `CLOCKWORK_STATE_DIR` variable overrides the state side for
    /// tests and containers.
    pub fn resolve() -> Result<Self, ConfigError> {
        let var_dir = match std::env::var_os("CLOCKWORK_STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .ok_or(ConfigError::NoHome)?
                .join("clockwork"),
        };
        let lib_dir = match std::env::var_os("CLOCKWORK_LIB_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir().ok_or(ConfigError::NoHome)?.join("clockwork"),
        };
        Ok(Self {
            lock_path: var_dir.join("clockwork.pid"),
            log_path: var_dir.join("clockwork.log"),
            config_path: lib_dir.join("clockwork.toml"),
            var_dir,
            lib_dir,
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
