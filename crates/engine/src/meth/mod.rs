// SPDX-License-Identifier: MIT

//! Method registry.
//!
//! A method is a named executor for the command portion of a job. Methods
//! are compiled in and handed to the registry at construction, or added
//! later through [`Registry::register`]; registering a name again replaces
//! the previous record. Threaded methods are rejected outright.
//!
//! Two execution shapes exist. `Source` methods run in the dispatcher's
//! own process: the registry stores a factory and a fresh
//! [`SourceMethod`] value is instantiated per run-set, giving the method
//! somewhere to keep per-series state between executions. `Fork` methods
//! run out of process: the record carries a builder turning the command
//! string into a child [`std::process::Command`].

mod exec;

pub use exec::{
    action_only, ExitNote, Executor, RelayMsg, RelayOutcome, PIPE_BUF, SHUTDOWN_KILL_WAIT,
    SHUTDOWN_TERM_WAIT,
};

use cw_route::Route;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Event raised (by the engine) when a forked method's child completes;
/// payload is the invocation key.
pub const CB_FINISHED: &str = "meth.finished";

#[derive(Debug, Error)]
pub enum MethError {
    #[error("threaded methods are unsupported ('{0}')")]
    ThreadKind(String),
    #[error("unknown method '{0}'")]
    UnknownMethod(String),
    /// The storage substrate refused bytes already taken from a child —
    /// die severity, the agent terminates.
    #[error("route write failed for job '{key}': {source}")]
    RouteWrite {
        key: String,
        #[source]
        source: cw_route::RouteError,
    },
    /// A live process references a run-set that is gone — internal
    /// inconsistency, die severity.
    #[error("no run-set for live job '{0}'")]
    MissingRunSet(String),
}

/// How a method is spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    None,
    /// Child process; output is relayed from pipes onto the routes.
    Fork,
    /// In the dispatcher's process.
    Source,
    /// Rejected at registration.
    Thread,
}

/// Per-run-set state and callbacks of a `Source` method.
///
/// `before_run` and `after_run` bracket a series of `action` calls; both
/// default to doing nothing.
pub trait SourceMethod: Send {
    fn before_run(&mut self, command: &str, res: &mut dyn Route, err: &mut dyn Route) -> i32 {
        let _ = (command, res, err);
        0
    }

    fn action(&mut self, command: &str, res: &mut dyn Route, err: &mut dyn Route) -> i32;

    fn after_run(&mut self, command: &str, res: &mut dyn Route, err: &mut dyn Route) -> i32 {
        let _ = (command, res, err);
        0
    }
}

/// Builds the child command line for a `Fork` method.
pub type ForkCommand = Box<dyn Fn(&str) -> std::process::Command + Send + Sync>;

/// Instantiates per-run-set state for a `Source` method.
pub type SourceFactory = Box<dyn Fn() -> Box<dyn SourceMethod> + Send + Sync>;

pub enum Runner {
    None,
    Fork(ForkCommand),
    Source(SourceFactory),
}

/// A registered method.
pub struct Method {
    pub name: String,
    pub info: String,
    pub kind: MethodKind,
    /// Synchronous preparation run in the caller's context before the
    /// action, whatever the kind.
    pub pre_action: Option<Box<dyn Fn(&str) -> i32 + Send + Sync>>,
    pub runner: Runner,
}

impl Method {
    pub fn fork(
        name: impl Into<String>,
        info: impl Into<String>,
        build: impl Fn(&str) -> std::process::Command + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            info: info.into(),
            kind: MethodKind::Fork,
            pre_action: None,
            runner: Runner::Fork(Box::new(build)),
        }
    }

    pub fn source(
        name: impl Into<String>,
        info: impl Into<String>,
        factory: impl Fn() -> Box<dyn SourceMethod> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            info: info.into(),
            kind: MethodKind::Source,
            pre_action: None,
            runner: Runner::Source(Box::new(factory)),
        }
    }

    pub fn none(name: impl Into<String>, info: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            info: info.into(),
            kind: MethodKind::None,
            pre_action: None,
            runner: Runner::None,
        }
    }

    pub fn with_pre_action(mut self, pre: impl Fn(&str) -> i32 + Send + Sync + 'static) -> Self {
        self.pre_action = Some(Box::new(pre));
        self
    }
}

/// Table of named methods.
#[derive(Default)]
pub struct Registry {
    methods: HashMap<String, Arc<Method>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method, replacing any previous record of the same name.
    pub fn register(&mut self, method: Method) -> Result<(), MethError> {
        if method.kind == MethodKind::Thread {
            return Err(MethError::ThreadKind(method.name));
        }
        if self.methods.contains_key(&method.name) {
            debug!(method = %method.name, "replacing registered method");
        }
        self.methods.insert(method.name.clone(), Arc::new(method));
        Ok(())
    }

    /// Presence test without retrieval.
    pub fn check(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Method>> {
        self.methods.get(name).cloned()
    }

    /// (name, info) pairs sorted by name, for usage listings.
    pub fn describe(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .methods
            .values()
            .map(|m| (m.name.clone(), m.info.clone()))
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod registry_tests;
