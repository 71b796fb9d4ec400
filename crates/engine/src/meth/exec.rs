// SPDX-License-Identifier: MIT

//! Method executor: run-set and process lifecycle, and the I/O relay.
//!
//! A run-set is the per-key state of an invocation series: the two opened
//! routes, the pid of any live child, and the instantiated source-method
//! state. Forked children get their stdout and stderr piped; two pump
//! tasks forward pipe bytes as [`RelayMsg`] and a supervisor task posts
//! the exit status, so the engine's single relay loop performs every
//! route write and all bookkeeping on the main context. A child is
//! finalised when its exit status has arrived and both pipes have hit
//! end-of-file, strictly in that combined order, so `meth.finished` is
//! only reported after the output is drained and flushed.

use super::{MethError, Method, Registry, Runner, SourceMethod};
use cw_core::{Clock, Invocation};
use cw_route::{Route, RouteError, Router};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Read size for one pipe drain.
pub const PIPE_BUF: usize = 4096;

/// How long the polite shutdown stage waits for children to leave.
pub const SHUTDOWN_TERM_WAIT: std::time::Duration = std::time::Duration::from_secs(3);

/// How long the forcible shutdown stage waits.
pub const SHUTDOWN_KILL_WAIT: std::time::Duration = std::time::Duration::from_secs(2);

/// Messages feeding the relay loop.
#[derive(Debug)]
pub enum RelayMsg {
    Stdout { pid: u32, chunk: Vec<u8> },
    Stderr { pid: u32, chunk: Vec<u8> },
    StdoutClosed { pid: u32 },
    StderrClosed { pid: u32 },
    Exited { pid: u32, note: ExitNote },
    /// An externally-registered readiness source (e.g. an HTTP listener)
    /// asking for `event` to be raised with `token`.
    External { event: String, token: i32 },
}

/// How a child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitNote {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitNote {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }

    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exit={code}"),
            (None, Some(sig)) => format!("signal={} {}", sig, signal_name(sig)),
            (None, None) => "unknown termination".to_string(),
        }
    }
}

fn signal_name(sig: i32) -> String {
    Signal::try_from(sig)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("sig{sig}"))
}

/// What one relay step produced.
#[derive(Debug, Default)]
pub struct RelayOutcome {
    /// Invocation keys whose child completed and drained; the engine
    /// raises `meth.finished` for each.
    pub finished: Vec<String>,
    /// (event, token) pairs from external readiness sources.
    pub external: Vec<(String, i32)>,
}

struct RunSet {
    result_url: String,
    error_url: String,
    res: Box<dyn Route>,
    err: Box<dyn Route>,
    opened: i64,
    pid: Option<u32>,
    /// Created implicitly by an execute call; end-of-run runs after each
    /// execution and carries no after-run callback.
    oneshot: bool,
    source: Option<Box<dyn SourceMethod>>,
}

struct RunProcess {
    key: String,
    pid: u32,
    started: i64,
    stdout_open: bool,
    stderr_open: bool,
    exited: Option<ExitNote>,
    /// Tells the pumps to stop waiting for end-of-file. Needed when a
    /// grandchild inherits the pipe write end and would hold it open past
    /// the child's own exit.
    abort: tokio::sync::watch::Sender<bool>,
}

/// Route that discards everything; last-resort fallback when even the
/// standard streams cannot be opened.
struct NullRoute;

impl Route for NullRoute {
    fn url(&self) -> &str {
        "null:"
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, RouteError> {
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), RouteError> {
        Ok(())
    }
}

pub struct Executor {
    registry: Registry,
    router: Arc<Router>,
    clock: Arc<dyn Clock>,
    runsets: HashMap<String, RunSet>,
    procs: HashMap<u32, RunProcess>,
    relay_tx: mpsc::UnboundedSender<RelayMsg>,
}

impl Executor {
    pub fn new(
        registry: Registry,
        router: Arc<Router>,
        clock: Arc<dyn Clock>,
        relay_tx: mpsc::UnboundedSender<RelayMsg>,
    ) -> Self {
        Self {
            registry,
            router,
            clock,
            runsets: HashMap::new(),
            procs: HashMap::new(),
            relay_tx,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Sender for external readiness sources.
    pub fn relay_sender(&self) -> mpsc::UnboundedSender<RelayMsg> {
        self.relay_tx.clone()
    }

    fn open_or_fallback(&self, url: &str, keep: i64, key: &str, fallback: &str) -> Box<dyn Route> {
        match self.router.open(url, keep) {
            Ok(route) => route,
            Err(e) => {
                error!(key, url, error = %e, "cannot open route, using {fallback}");
                self.router
                    .open(fallback, 1)
                    .unwrap_or_else(|_| Box::new(NullRoute))
            }
        }
    }

    /// Open the I/O routes for an invocation series and run the method's
    /// before-run callback. Tells the executor a run of executions is
    /// coming and the I/O should stay open across them.
    pub fn start_run(&mut self, inv: &Invocation) -> i32 {
        debug!(key = %inv.key, method = %inv.method, command = %inv.command,
               results = %inv.result_url, errors = %inv.error_url,
               "start-of-run, opening routes");

        let Some(method) = self.registry.lookup(&inv.method) else {
            error!(key = %inv.key, method = %inv.method, "unknown method");
            return -1;
        };

        let res = self.open_or_fallback(&inv.result_url, inv.keep, &inv.key, "stdout:");
        let err = self.open_or_fallback(&inv.error_url, inv.keep, &inv.key, "stderr:");
        let mut rset = RunSet {
            result_url: inv.result_url.clone(),
            error_url: inv.error_url.clone(),
            res,
            err,
            opened: self.clock.epoch_secs(),
            pid: None,
            oneshot: false,
            source: match &method.runner {
                Runner::Source(factory) => Some(factory()),
                _ => None,
            },
        };

        let ret = {
            let RunSet {
                source, res, err, ..
            } = &mut rset;
            match source {
                Some(state) => state.before_run(&inv.command, res.as_mut(), err.as_mut()),
                None => 0,
            }
        };
        if ret != 0 {
            error!(key = %inv.key, ret, "before-run returned failure");
        }
        self.runsets.insert(inv.key.clone(), rset);
        ret
    }

    /// Execute the method once.
    ///
    /// If no run-set exists for the key one is created implicitly and
    /// flagged one-shot, so end-of-run happens at the end of this
    /// execution instead of waiting for the caller.
    pub fn execute(&mut self, inv: &Invocation) -> i32 {
        debug!(key = %inv.key, method = %inv.method, command = %inv.command, "running job");

        let Some(method) = self.registry.lookup(&inv.method) else {
            error!(key = %inv.key, method = %inv.method, "unknown method");
            return -1;
        };

        if !self.runsets.contains_key(&inv.key) {
            debug!(key = %inv.key, "routes not opened, assuming oneshot");
            self.start_run(inv);
            match self.runsets.get_mut(&inv.key) {
                Some(rset) => rset.oneshot = true,
                None => return -1,
            }
        }

        if let Some(pre) = &method.pre_action {
            let r = pre(&inv.command);
            if r != 0 {
                error!(key = %inv.key, r, "preaction returned failure");
            }
        }

        match &method.runner {
            Runner::Source(_) => self.run_source(inv),
            Runner::Fork(_) => self.run_fork(inv, &method),
            Runner::None => {
                debug!(key = %inv.key, "no method for job");
                self.finish_oneshot(inv);
                0
            }
        }
    }

    fn run_source(&mut self, inv: &Invocation) -> i32 {
        let Some(rset) = self.runsets.get_mut(&inv.key) else {
            return -1;
        };
        let r = {
            let RunSet {
                source, res, err, ..
            } = rset;
            match source {
                Some(state) => state.action(&inv.command, res.as_mut(), err.as_mut()),
                None => 0,
            }
        };
        if r != 0 {
            error!(key = %inv.key, r, "source job failure");
        } else {
            info!(key = %inv.key, "source job success");
        }
        if let Err(e) = rset.res.flush() {
            warn!(key = %inv.key, error = %e, "result flush failed");
        }
        if let Err(e) = rset.err.flush() {
            warn!(key = %inv.key, error = %e, "error flush failed");
        }
        self.finish_oneshot(inv);
        r
    }

    fn run_fork(&mut self, inv: &Invocation, method: &Method) -> i32 {
        let Runner::Fork(build) = &method.runner else {
            return -1;
        };
        let mut cmd = tokio::process::Command::from(build(&inv.command));
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(key = %inv.key, error = %e, "unable to spawn, abandon");
                self.finish_oneshot(inv);
                return 2;
            }
        };
        let Some(pid) = child.id() else {
            error!(key = %inv.key, "spawned child has no pid, abandon");
            self.finish_oneshot(inv);
            return 2;
        };

        let (abort, abort_rx) = tokio::sync::watch::channel(false);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_open = stdout.is_some();
        let stderr_open = stderr.is_some();
        if let Some(reader) = stdout {
            pump(reader, pid, true, self.relay_tx.clone(), abort_rx.clone());
        }
        if let Some(reader) = stderr {
            pump(reader, pid, false, self.relay_tx.clone(), abort_rx);
        }
        let tx = self.relay_tx.clone();
        tokio::spawn(async move {
            let note = match child.wait().await {
                Ok(status) => ExitNote::from_status(status),
                Err(e) => {
                    warn!(pid, error = %e, "wait on child failed");
                    ExitNote {
                        code: None,
                        signal: None,
                    }
                }
            };
            let _ = tx.send(RelayMsg::Exited { pid, note });
        });

        debug!(key = %inv.key, pid, "fork job spawned");
        self.procs.insert(
            pid,
            RunProcess {
                key: inv.key.clone(),
                pid,
                started: self.clock.epoch_secs(),
                stdout_open,
                stderr_open,
                exited: None,
                abort,
            },
        );
        if let Some(rset) = self.runsets.get_mut(&inv.key) {
            rset.pid = Some(pid);
        }
        0
    }

    fn finish_oneshot(&mut self, inv: &Invocation) {
        let oneshot = self
            .runsets
            .get(&inv.key)
            .map(|r| r.oneshot)
            .unwrap_or(false);
        if oneshot {
            self.end_run(&inv.key, &inv.command);
        }
    }

    /// Close the I/O routes for a key.
    ///
    /// Returns -1 while a process is still live for the key (retry after
    /// the reap) or when no run-set exists. Implicit one-shot run-sets
    /// have no after-run callback by construction.
    pub fn end_run(&mut self, key: &str, command: &str) -> i32 {
        debug!(key, "end-of-run, closing routes");
        if self.is_running(key) {
            return -1;
        }
        let Some(mut rset) = self.runsets.remove(key) else {
            error!(key, "no run-set or open routes for key");
            return -1;
        };

        let mut ret = 0;
        if !rset.oneshot {
            let RunSet {
                source, res, err, ..
            } = &mut rset;
            if let Some(state) = source {
                ret = state.after_run(command, res.as_mut(), err.as_mut());
                if ret != 0 {
                    error!(key, ret, "after-run returned failure");
                }
            }
        }
        let _ = rset.res.flush();
        let _ = rset.err.flush();
        debug!(
            key,
            open_secs = self.clock.epoch_secs() - rset.opened,
            results = %rset.result_url,
            errors = %rset.error_url,
            "routes closed"
        );
        ret
    }

    /// Is a process live for this key?
    pub fn is_running(&self, key: &str) -> bool {
        self.runsets
            .get(key)
            .map(|r| r.pid.is_some())
            .unwrap_or(false)
    }

    /// One relay step: apply a message from the pumps, supervisors or
    /// external sources.
    pub fn relay_step(&mut self, msg: RelayMsg) -> Result<RelayOutcome, MethError> {
        let mut out = RelayOutcome::default();
        match msg {
            RelayMsg::Stdout { pid, chunk } => self.write_chunk(pid, &chunk, true)?,
            RelayMsg::Stderr { pid, chunk } => self.write_chunk(pid, &chunk, false)?,
            RelayMsg::StdoutClosed { pid } => {
                if let Some(proc) = self.procs.get_mut(&pid) {
                    debug!(key = %proc.key, pid, "closing job result pipe");
                    proc.stdout_open = false;
                    self.try_finalise(pid, &mut out);
                }
            }
            RelayMsg::StderrClosed { pid } => {
                if let Some(proc) = self.procs.get_mut(&pid) {
                    debug!(key = %proc.key, pid, "closing job error pipe");
                    proc.stderr_open = false;
                    self.try_finalise(pid, &mut out);
                }
            }
            RelayMsg::Exited { pid, note } => match self.procs.get_mut(&pid) {
                Some(proc) => {
                    let took = (self.clock.epoch_secs() - proc.started).max(0) as u64;
                    info!(
                        key = %proc.key,
                        pid,
                        took = %cw_core::format_elapsed(took),
                        "fork job {}",
                        note.describe()
                    );
                    proc.exited = Some(note);
                    if proc.stdout_open || proc.stderr_open {
                        // Something may still hold the write ends; have the
                        // pumps drain a residual read and stop.
                        let _ = proc.abort.send(true);
                    }
                    self.try_finalise(pid, &mut out);
                }
                None => warn!(pid, "unknown process {}", note.describe()),
            },
            RelayMsg::External { event, token } => out.external.push((event, token)),
        }
        Ok(out)
    }

    fn write_chunk(&mut self, pid: u32, chunk: &[u8], to_result: bool) -> Result<(), MethError> {
        let Some(proc) = self.procs.get(&pid) else {
            warn!(pid, len = chunk.len(), "orphaned descriptor data");
            return Ok(());
        };
        let key = proc.key.clone();
        let Some(rset) = self.runsets.get_mut(&key) else {
            return Err(MethError::MissingRunSet(key));
        };
        let dest = if to_result {
            rset.res.as_mut()
        } else {
            rset.err.as_mut()
        };
        dest.write(chunk)
            .map_err(|source| MethError::RouteWrite { key, source })?;
        Ok(())
    }

    /// Finalise a child once its exit status is in and both pipes have
    /// drained: flush the routes, clear the pid, run the one-shot
    /// end-of-run, drop the process record and report the key.
    fn try_finalise(&mut self, pid: u32, out: &mut RelayOutcome) {
        let done = self
            .procs
            .get(&pid)
            .map(|p| p.exited.is_some() && !p.stdout_open && !p.stderr_open)
            .unwrap_or(false);
        if !done {
            return;
        }
        let Some(proc) = self.procs.remove(&pid) else {
            return;
        };
        let key = proc.key;

        let oneshot = match self.runsets.get_mut(&key) {
            Some(rset) => {
                if let Err(e) = rset.res.flush() {
                    warn!(key = %key, error = %e, "result flush failed");
                }
                if let Err(e) = rset.err.flush() {
                    warn!(key = %key, error = %e, "error flush failed");
                }
                rset.pid = None;
                rset.oneshot
            }
            None => {
                warn!(key = %key, pid, "reaped child without a run-set");
                false
            }
        };
        if oneshot {
            self.end_run(&key, "");
        }
        out.finished.push(key);
    }

    /// Pids of all live children.
    pub fn live_pids(&self) -> Vec<u32> {
        self.procs.keys().copied().collect()
    }

    pub fn live_count(&self) -> usize {
        self.procs.len()
    }

    /// Signal every live child. `catchable` selects the polite first
    /// stage; the uncatchable second stage is for those that would not go
    /// quietly.
    pub fn signal_children(&self, catchable: bool) {
        let sig = if catchable {
            Signal::SIGTERM
        } else {
            Signal::SIGKILL
        };
        for proc in self.procs.values() {
            if catchable {
                info!(key = %proc.key, pid = proc.pid, "shutting down job");
            } else {
                warn!(key = %proc.key, pid = proc.pid, "aborting job");
            }
            if let Err(e) = nix::sys::signal::kill(Pid::from_raw(proc.pid as i32), sig) {
                error!(pid = proc.pid, error = %e, "unable to signal child");
            }
        }
    }
}

impl crate::runq::RunHandler for Executor {
    fn start_of_run(&mut self, inv: &Invocation) -> i32 {
        self.start_run(inv)
    }

    fn command(&mut self, inv: &Invocation) -> i32 {
        self.execute(inv)
    }

    fn is_running(&self, inv: &Invocation) -> bool {
        Executor::is_running(self, &inv.key)
    }

    fn end_of_run(&mut self, inv: &Invocation) -> i32 {
        self.end_run(&inv.key, &inv.command)
    }
}

/// Forward one pipe's bytes to the relay, closing with an end-of-stream
/// message. Pumps own nothing but the reader; all state changes happen in
/// the relay. An abort makes the pump drain one bounded residual read and
/// report the stream closed, dropping the read end.
fn pump<R>(
    mut reader: R,
    pid: u32,
    is_stdout: bool,
    tx: mpsc::UnboundedSender<RelayMsg>,
    mut abort: tokio::sync::watch::Receiver<bool>,
) where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; PIPE_BUF];
        let data = |chunk: Vec<u8>| {
            if is_stdout {
                RelayMsg::Stdout { pid, chunk }
            } else {
                RelayMsg::Stderr { pid, chunk }
            }
        };
        loop {
            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(data(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                },
                _ = abort.changed() => {
                    // Residual drain, then give up on end-of-file.
                    if let Ok(Ok(n)) = tokio::time::timeout(
                        std::time::Duration::from_millis(50),
                        reader.read(&mut buf),
                    )
                    .await
                    {
                        if n > 0 {
                            let _ = tx.send(data(buf[..n].to_vec()));
                        }
                    }
                    break;
                }
            }
        }
        let msg = if is_stdout {
            RelayMsg::StdoutClosed { pid }
        } else {
            RelayMsg::StderrClosed { pid }
        };
        let _ = tx.send(msg);
    });
}

/// Stand-alone execution path for the method runner utility: run one
/// method synchronously, ignoring run-sets and naming, writing its output
/// through freshly opened routes.
pub fn action_only(
    router: &Router,
    method: &Method,
    command: &str,
    result_url: &str,
    error_url: &str,
    keep: i64,
) -> i32 {
    let (mut res, mut err) = match (router.open(result_url, keep), router.open(error_url, keep)) {
        (Ok(res), Ok(err)) => (res, err),
        _ => {
            error!(results = result_url, errors = error_url, "unable to open routes");
            return 1;
        }
    };

    if let Some(pre) = &method.pre_action {
        let r = pre(command);
        if r != 0 {
            error!(r, "method preparation failed");
        }
    }

    let r = match &method.runner {
        Runner::Source(factory) => {
            let mut state = factory();
            state.action(command, res.as_mut(), err.as_mut())
        }
        Runner::Fork(build) => {
            let mut cmd = build(command);
            match cmd.output() {
                Ok(output) => {
                    if !output.stdout.is_empty() && res.write(&output.stdout).is_err() {
                        error!("cannot write method results");
                    }
                    if !output.stderr.is_empty() && err.write(&output.stderr).is_err() {
                        error!("cannot write method errors");
                    }
                    output.status.code().unwrap_or(-1)
                }
                Err(e) => {
                    error!(error = %e, "method failed to start");
                    1
                }
            }
        }
        Runner::None => 0,
    };
    if r != 0 {
        error!(r, "method failed");
    }
    let _ = res.flush();
    let _ = err.flush();
    r
}
