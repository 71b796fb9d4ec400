// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cw-engine: the scheduling and execution engine.
//!
//! The cooperating pieces: the run queue (`runq`) keeps a work table and a
//! time-ordered event list; the method registry and executor (`meth`) run
//! the work in-process or as child processes and relay child output onto
//! routes; the job layer binds job-table rows to the two. A single
//! [`Engine`] value owns all of it behind the [`gate::Gate`], and the
//! callback bus wires expiry and completion between the layers.

pub mod builtins;
pub mod cascade;
pub mod engine;
pub mod eventq;
pub mod gate;
pub mod job;
pub mod meth;
pub mod runq;

pub use engine::{Engine, EngineCore, EngineError, RunExit, ShutdownHandle, ShutdownKind};
pub use gate::Gate;
pub use job::{JobAdded, JobError, JobSpec, JobTable};
pub use meth::{
    Method, MethodKind, MethError, RelayMsg, Registry, Runner, SourceMethod,
};
pub use runq::{Added, DispatchOutcome, HookSet, RunHandler, RunQueue, RunqError, WorkSpec};
