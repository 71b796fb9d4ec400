// SPDX-License-Identifier: MIT

//! Compiled-in methods.
//!
//! `exec` and `sh` fork child processes; `tstamp` samples the clock in
//! process; `sample` is the cascade sampler, `event` the event-queue
//! processor; `shutdown` and `restart` drive the agent's shutdown
//! callback.

use crate::cascade::Cascade;
use crate::engine::{ShutdownHandle, ShutdownKind};
use crate::eventq::{EventSpool, EventWatch};
use crate::meth::{Method, Registry, SourceMethod};
use cw_route::{Route, Router};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Context captured by the builtins.
pub struct BuiltinCx {
    pub router: Arc<Router>,
    pub spool: EventSpool,
    pub shutdown: ShutdownHandle,
}

/// Register every builtin. Registration failures cannot occur here (no
/// builtin is threaded), so the result is flattened away.
pub fn register(reg: &mut Registry, cx: &BuiltinCx) {
    let methods = [
        Method::fork("exec", "execute a program directly", exec_command),
        Method::fork("sh", "execute a shell command", sh_command),
        Method::source("tstamp", "timestamp sample", || Box::new(Tstamp)),
        {
            let router = Arc::clone(&cx.router);
            Method::source("sample", "cascade sampler over a source ring", move || {
                Box::new(Cascade::new(Arc::clone(&router)))
            })
        },
        {
            let router = Arc::clone(&cx.router);
            let spool = cx.spool.clone();
            Method::source("event", "run commands arriving on event queues", move || {
                Box::new(EventWatch::new(Arc::clone(&router), spool.clone()))
            })
        },
        {
            let handle = cx.shutdown.clone();
            Method::source("shutdown", "shut the agent down", move || {
                Box::new(Control {
                    handle: handle.clone(),
                    kind: ShutdownKind::Stop,
                })
            })
        },
        {
            let handle = cx.shutdown.clone();
            Method::source("restart", "restart the agent", move || {
                Box::new(Control {
                    handle: handle.clone(),
                    kind: ShutdownKind::Restart,
                })
            })
        },
    ];
    for method in methods {
        let _ = reg.register(method);
    }
}

fn exec_command(command: &str) -> std::process::Command {
    let mut parts = command.split_whitespace();
    let mut cmd = std::process::Command::new(parts.next().unwrap_or("true"));
    cmd.args(parts);
    cmd
}

fn sh_command(command: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

struct Tstamp;

impl SourceMethod for Tstamp {
    fn action(&mut self, _command: &str, res: &mut dyn Route, _err: &mut dyn Route) -> i32 {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        match res.write(format!("{secs}\n").as_bytes()) {
            Ok(_) => 0,
            Err(_) => -1,
        }
    }
}

struct Control {
    handle: ShutdownHandle,
    kind: ShutdownKind,
}

impl SourceMethod for Control {
    fn action(&mut self, _command: &str, _res: &mut dyn Route, _err: &mut dyn Route) -> i32 {
        match self.kind {
            ShutdownKind::Stop => info!("agent shutting down from a method"),
            ShutdownKind::Restart => info!("agent restarting from a method"),
        }
        self.handle.request(self.kind);
        0
    }
}

#[cfg(test)]
#[path = "builtins_tests.rs"]
mod tests;
