// SPDX-License-Identifier: MIT

//! Built-in path handlers: liveness, configuration, log routing, host
//! facts, and locally stored ring data.

use crate::response::Response;
use crate::server::{Handler, Httpd};
use crate::Request;
use cw_route::{trim_ring_name, RingStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Facts the agent hands to the built-in handlers.
#[derive(Debug, Default, Clone)]
pub struct AgentInfo {
    /// Flattened configuration directives, name order.
    pub config: Vec<(String, String)>,
    /// Log routing table: severity name to route.
    pub elog: Vec<(String, String)>,
    pub hostname: String,
    pub os: String,
    pub machine: String,
    pub timezone: String,
    /// Var directory holding `<host>.rs`.
    pub var_dir: PathBuf,
}

impl AgentInfo {
    fn local_store(&self) -> RingStore {
        RingStore::new(self.var_dir.join(format!("{}.rs", self.hostname)))
    }
}

/// Register the standard endpoint set.
pub fn register_builtin_paths(httpd: &Httpd, info: Arc<AgentInfo>) {
    httpd.add_path("/ping", Arc::new(|_req: &Request| ping()));
    {
        let info = Arc::clone(&info);
        httpd.add_path(
            "/cf",
            Arc::new(move |_req: &Request| name_value_page("Configuration", &info.config)),
        );
    }
    {
        let info = Arc::clone(&info);
        httpd.add_path(
            "/elog",
            Arc::new(move |_req: &Request| name_value_page("Log routes", &info.elog)),
        );
    }
    {
        let info = Arc::clone(&info);
        httpd.add_path(
            "/info",
            Arc::new(move |_req: &Request| {
                let rows = vec![
                    ("hostname".to_string(), info.hostname.clone()),
                    ("os".to_string(), info.os.clone()),
                    ("machine".to_string(), info.machine.clone()),
                    ("timezone".to_string(), info.timezone.clone()),
                ];
                name_value_page("Host information", &rows)
            }),
        );
    }
    {
        let info = Arc::clone(&info);
        let handler: Handler = Arc::new(move |req: &Request| local_rings(&info, req, false));
        httpd.add_path("/localtsv/", handler);
    }
    {
        let handler: Handler = Arc::new(move |req: &Request| local_rings(&info, req, true));
        httpd.add_path("/local/", handler);
    }
}

fn ping() -> Response {
    Response::html("hello, world\n")
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn name_value_page(title: &str, rows: &[(String, String)]) -> Response {
    let mut body = format!(
        "<html><head><title>{title}</title></head><body><h2>{title}</h2>\n\
         <table border=1>\n<tr><th>name</th><th>value</th></tr>\n"
    );
    for (name, value) in rows {
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            html_escape(name),
            html_escape(value)
        ));
    }
    body.push_str("</table></body></html>\n");
    Response::html(body)
}

/// Serve a ring from the per-host store: the trailing path names the
/// ring, with an optional leading comma and surplus slashes stripped.
fn local_rings(info: &AgentInfo, req: &Request, html: bool) -> Response {
    let ring = trim_ring_name(req.trailing());
    let store = info.local_store();

    if ring.is_empty() {
        // Index of available rings.
        return match store.rings() {
            Ok(rings) => {
                let rows: Vec<(String, String)> = rings
                    .into_iter()
                    .map(|r| (r.clone(), format!("/local/{r}")))
                    .collect();
                name_value_page("Local rings", &rows)
            }
            Err(_) => Response::error(404, "no local store"),
        };
    }

    let entries = match store.entries(ring) {
        Ok(entries) if !entries.is_empty() => entries,
        _ => return Response::error(404, &format!("ring '{ring}' has no data")),
    };
    let modified = entries.iter().map(|e| e.time).max();

    if html {
        let mut body = format!(
            "<html><head><title>{ring}</title></head><body><h2>{ring}</h2>\n\
             <table border=1>\n<tr><th>seq</th><th>time</th><th>data</th></tr>\n"
        );
        for entry in &entries {
            body.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td><pre>{}</pre></td></tr>\n",
                entry.seq,
                entry.time,
                html_escape(&entry.text)
            ));
        }
        body.push_str("</table></body></html>\n");
        Response {
            last_modified: modified,
            ..Response::html(body)
        }
    } else {
        let mut body = String::from("seq\ttime\tdata\n");
        for entry in &entries {
            body.push_str(&format!(
                "{}\t{}\t{}\n",
                entry.seq,
                entry.time,
                entry.text.replace('\n', "\\n").replace('\t', "\\t")
            ));
        }
        Response {
            last_modified: modified,
            ..Response::text(body)
        }
    }
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
