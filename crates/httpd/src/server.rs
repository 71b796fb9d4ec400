// SPDX-License-Identifier: MIT

//! Server lifecycle: bind, accept, serve, stop.
//!
//! Listeners announce each accepted connection to the engine relay as an
//! `httpd.accept` event, then service the connection inline — one at a
//! time per listener. Stopping clears the active flag so already-accepted
//! connections are closed without servicing, and aborts the accept tasks.

use crate::request::{parse_head, HttpMethod, ParseError, Request};
use crate::response::{write_response, Response};
use crate::CB_ACCEPT;
use cw_engine::RelayMsg;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Largest request head we are prepared to buffer.
const MAX_HEAD: usize = 16 * 1024;

/// How long a connection may take to deliver its request. The server is
/// not designed for slow or streaming uploads.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum HttpdError {
    #[error("interface '{0}' does not parse as an address")]
    BadInterface(String),
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("no listener could be established")]
    NoListener,
}

pub type Handler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// Shared with the accept tasks.
struct Shared {
    /// Ordered path table; first prefix match wins.
    paths: Mutex<Vec<(String, Handler)>>,
    active: AtomicBool,
}

pub struct Httpd {
    interface: String,
    port: u16,
    shared: Arc<Shared>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    bound: Vec<SocketAddr>,
}

impl Httpd {
    /// Record the configured interface and port; an empty interface means
    /// all of them.
    pub fn new(interface: impl Into<String>, port: u16) -> Self {
        Self {
            interface: interface.into(),
            port,
            shared: Arc::new(Shared {
                paths: Mutex::new(Vec::new()),
                active: AtomicBool::new(false),
            }),
            tasks: Vec::new(),
            bound: Vec::new(),
        }
    }

    /// Append a handler to the path table. Insertion order is dispatch
    /// order.
    pub fn add_path(&self, prefix: impl Into<String>, handler: Handler) {
        self.shared.paths.lock().push((prefix.into(), handler));
    }

    pub fn remove_path(&self, prefix: &str) {
        self.shared.paths.lock().retain(|(p, _)| p != prefix);
    }

    /// Addresses actually bound; filled by [`start`](Self::start).
    pub fn bound(&self) -> &[SocketAddr] {
        &self.bound
    }

    /// Resolve the interface, bind the v4 and v6 listeners and spawn
    /// their accept loops.
    pub async fn start(
        &mut self,
        relay: mpsc::UnboundedSender<RelayMsg>,
    ) -> Result<(), HttpdError> {
        let addrs: Vec<IpAddr> = if self.interface.is_empty() || self.interface == "*" {
            vec![
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            ]
        } else {
            vec![self
                .interface
                .parse()
                .map_err(|_| HttpdError::BadInterface(self.interface.clone()))?]
        };

        let mut last_err = None;
        for ip in addrs {
            let addr = SocketAddr::new(ip, self.port);
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    let local = listener.local_addr().unwrap_or(addr);
                    info!(%local, "http daemon listening");
                    self.bound.push(local);
                    self.tasks.push(tokio::spawn(accept_loop(
                        listener,
                        Arc::clone(&self.shared),
                        relay.clone(),
                    )));
                }
                Err(source) => {
                    debug!(%addr, error = %source, "listener bind failed");
                    last_err = Some(HttpdError::Bind { addr, source });
                }
            }
        }
        if self.tasks.is_empty() {
            return Err(last_err.unwrap_or(HttpdError::NoListener));
        }
        self.shared.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop serving: pending connections are closed without servicing and
    /// the listeners are dropped.
    pub fn stop(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.bound.clear();
    }
}

impl Drop for Httpd {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    relay: mpsc::UnboundedSender<RelayMsg>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let _ = relay.send(RelayMsg::External {
                    event: CB_ACCEPT.to_string(),
                    token: stream.as_raw_fd(),
                });
                if !shared.active.load(Ordering::SeqCst) {
                    // Stopped: close without servicing.
                    drop(stream);
                    continue;
                }
                debug!(%peer, "serving http connection");
                serve(stream, &shared).await;
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

/// Read, parse, dispatch and answer one connection.
async fn serve(mut stream: TcpStream, shared: &Arc<Shared>) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let (head, mut body) = match read_head(&mut stream).await {
        Some(parts) => parts,
        // Unparseable or overlong header block: just close.
        None => return,
    };

    let (method, path, headers) = match parse_head(&head) {
        Ok(parsed) => parsed,
        Err(ParseError::UnknownMethod) => {
            answer(&mut stream, &Response::error(501, "method not implemented"), now, false).await;
            return;
        }
        Err(ParseError::BadPath) => {
            answer(&mut stream, &Response::error(400, "bad request path"), now, false).await;
            return;
        }
        Err(ParseError::Malformed) => return,
    };

    // Read any declared body inline; a stalled upload aborts the
    // connection.
    if let Some(length) = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
    {
        while body.len() < length {
            let mut chunk = vec![0u8; (length - body.len()).min(16 * 1024)];
            match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut chunk)).await {
                Ok(Ok(n)) if n > 0 => body.extend_from_slice(&chunk[..n]),
                _ => {
                    warn!("request body stalled, closing");
                    return;
                }
            }
        }
        body.truncate(length);
    }

    let matched = {
        let paths = shared.paths.lock();
        paths
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(prefix, handler)| (prefix.len(), Arc::clone(handler)))
    };

    let response = match matched {
        Some((matched, handler)) => {
            let request = Request {
                method,
                path: path.clone(),
                matched,
                headers,
                body,
            };
            handler(&request)
        }
        None => Response::not_found(&path),
    };
    answer(&mut stream, &response, now, method == HttpMethod::Head).await;
}

/// Read until the end of the header block; returns the head text and any
/// body bytes already buffered.
async fn read_head(stream: &mut TcpStream) -> Option<(String, Vec<u8>)> {
    let mut buf = Vec::with_capacity(1024);
    loop {
        let mut chunk = [0u8; 1024];
        let n = match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return None,
            Ok(Ok(n)) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_head_end(&buf) {
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            let body = buf.split_off(end);
            return Some((head, body));
        }
        if buf.len() > MAX_HEAD {
            return None;
        }
    }
}

/// Offset just past the first double CRLF or double LF.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .or_else(|| buf.windows(2).position(|w| w == b"\n\n").map(|p| p + 2))
}

async fn answer(stream: &mut TcpStream, response: &Response, now: i64, head_only: bool) {
    let bytes = write_response(response, now, head_only);
    if let Err(e) = stream.write_all(&bytes).await {
        debug!(error = %e, "response write failed");
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
