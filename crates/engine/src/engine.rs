// SPDX-License-Identifier: MIT

//! The engine: one value owning the run queue, the method executor and
//! the job table, plus the callback bus that wires them together.
//!
//! All state lives behind the gate and every mutation happens with it
//! closed; the loop opens it only across the relay's awaited receive and
//! the shutdown drains. Bus raises go through the engine so handlers can
//! mutate the tables without re-entering them: `meth.finished` finalises
//! expired work through the run queue, which queues `runq.expired`, which
//! drops the job layer's bookkeeping row.

use crate::builtins::{self, BuiltinCx};
use crate::eventq::{EventSpool, EVENT_KEEP};
use crate::gate::Gate;
use crate::job::{JobAdded, JobError, JobSpec, JobTable};
use crate::meth::{
    self, Executor, MethError, Method, Registry, RelayMsg, SHUTDOWN_KILL_WAIT, SHUTDOWN_TERM_WAIT,
};
use crate::runq::{self, RunQueue, RunqError};
use cw_core::callback::RaiseQueue;
use cw_core::{Callbacks, Clock, Payload, WorkId};
use cw_route::{ExpandContext, Router};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Runq(#[from] RunqError),
    #[error(transparent)]
    Meth(#[from] MethError),
    #[error("relay channel closed")]
    RelayClosed,
}

/// What a shutdown request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    Stop,
    /// Re-exec the agent after an orderly stop.
    Restart,
}

/// Requests an orderly shutdown of the engine loop. Clonable into
/// methods, signal tasks and anything else that may want the agent gone.
#[derive(Clone)]
pub struct ShutdownHandle {
    pub(crate) tx: mpsc::UnboundedSender<ShutdownKind>,
}

impl ShutdownHandle {
    pub fn request(&self, kind: ShutdownKind) {
        let _ = self.tx.send(kind);
    }
}

/// Why [`Engine::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Shutdown(ShutdownKind),
}

/// The state the gate protects.
pub struct EngineCore {
    pub runq: RunQueue,
    pub meth: Executor,
    pub jobs: JobTable,
    pub later: RaiseQueue,
}

pub struct Engine {
    clock: Arc<dyn Clock>,
    router: Arc<Router>,
    core: Arc<Gate<EngineCore>>,
    bus: Callbacks<EngineCore>,
    spool: EventSpool,
    relay_rx: mpsc::UnboundedReceiver<RelayMsg>,
    shutdown_rx: mpsc::UnboundedReceiver<ShutdownKind>,
    shutdown_tx: mpsc::UnboundedSender<ShutdownKind>,
}

impl Engine {
    pub fn new(clock: Arc<dyn Clock>, router: Arc<Router>) -> Self {
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let spool = EventSpool::new();

        let mut registry = Registry::new();
        builtins::register(
            &mut registry,
            &BuiltinCx {
                router: Arc::clone(&router),
                spool: spool.clone(),
                shutdown: ShutdownHandle {
                    tx: shutdown_tx.clone(),
                },
            },
        );

        let now = clock.epoch_secs();
        let core = EngineCore {
            runq: RunQueue::new(now),
            meth: Executor::new(registry, Arc::clone(&router), Arc::clone(&clock), relay_tx),
            jobs: JobTable::new(now),
            later: RaiseQueue::default(),
        };

        let mut bus = Callbacks::new();
        wire(&mut bus);

        Self {
            clock,
            router,
            core: Arc::new(Gate::new(core)),
            bus,
            spool,
            relay_rx,
            shutdown_rx,
            shutdown_tx,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Shared view of the engine state, for observers.
    pub fn core(&self) -> Arc<Gate<EngineCore>> {
        Arc::clone(&self.core)
    }

    /// Sender for external readiness sources (the HTTP daemon's accept
    /// notifications arrive through this).
    pub fn relay_sender(&self) -> mpsc::UnboundedSender<RelayMsg> {
        self.core.close().meth.relay_sender()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Register an additional method.
    pub fn register_method(&self, method: Method) -> Result<(), MethError> {
        self.core.close().meth.registry_mut().register(method)
    }

    /// Load a job table from a route; returns rows added.
    pub fn load_jobs(&self, url: &str, cx: &ExpandContext) -> Result<usize, JobError> {
        let now = self.clock.epoch_secs();
        let mut core = self.core.close();
        let EngineCore {
            runq, meth, jobs, ..
        } = &mut *core;
        jobs.load_route(runq, meth.registry(), &self.router, cx, url, now)
    }

    /// Submit a single job.
    pub fn add_job(&self, spec: JobSpec) -> Result<JobAdded, JobError> {
        let now = self.clock.epoch_secs();
        let mut core = self.core.close();
        let EngineCore {
            runq, meth, jobs, ..
        } = &mut *core;
        jobs.add(runq, meth.registry(), now, spec)
    }

    /// Cancel a job's future dispatches and drop its bookkeeping row.
    pub fn remove_job(&self, work: WorkId) -> bool {
        let now = self.clock.epoch_secs();
        let mut core = self.core.close();
        let EngineCore {
            runq, meth, jobs, ..
        } = &mut *core;
        let removed = runq.remove(work, now, meth);
        if removed {
            jobs.remove_row(work);
        }
        removed
    }

    /// One timer tick: dispatch due work and submit any event-spooled
    /// one-off jobs.
    pub fn tick(&mut self) -> Result<(), EngineError> {
        let now = self.clock.epoch_secs();
        let due = self
            .core
            .close()
            .runq
            .next_deadline()
            .is_some_and(|d| d <= now);
        if due {
            let mut core = self.core.close();
            let outcome = {
                let EngineCore { runq, meth, .. } = &mut *core;
                runq.dispatch(now, meth)?
            };
            for id in outcome.expired {
                Self::raise(
                    &mut self.bus,
                    &mut core,
                    runq::CB_EXPIRED,
                    &[Payload::Id(id.as_i64())],
                );
            }
        }
        self.drain_spool();
        Ok(())
    }

    fn drain_spool(&mut self) {
        let pending = self.spool.drain();
        if pending.is_empty() {
            return;
        }
        let now = self.clock.epoch_secs();
        let mut core = self.core.close();
        let EngineCore {
            runq, meth, jobs, ..
        } = &mut *core;
        for job in pending {
            // One second out, so the schedule has a future grid point.
            let spec = JobSpec {
                start: now + 1 - jobs.start_time(),
                interval: 0,
                phase: 0,
                count: 1,
                key: job.key.clone(),
                origin: "(event)".to_string(),
                result_url: job.result_url,
                error_url: job.error_url,
                keep: EVENT_KEEP,
                method: job.method,
                command: job.command,
            };
            if let Err(e) = jobs.add(runq, meth.registry(), now, spec) {
                error!(key = %job.key, error = %e, "cannot create event job");
            }
        }
    }

    /// Apply one relay message and raise whatever it produced.
    fn handle_relay(&mut self, msg: RelayMsg) -> Result<(), EngineError> {
        let mut core = self.core.close();
        let outcome = core.meth.relay_step(msg)?;
        for key in outcome.finished {
            Self::raise(
                &mut self.bus,
                &mut core,
                meth::CB_FINISHED,
                &[Payload::Key(key)],
            );
        }
        for (event, token) in outcome.external {
            Self::raise(&mut self.bus, &mut core, &event, &[Payload::Fd(token)]);
        }
        Ok(())
    }

    /// Raise an event and drain any follow-ups handlers queued.
    fn raise(bus: &mut Callbacks<EngineCore>, core: &mut EngineCore, event: &str, args: &[Payload]) {
        bus.raise(core, event, args);
        while !core.later.is_empty() {
            for (event, args) in core.later.drain() {
                bus.raise(core, &event, &args);
            }
        }
    }

    /// The main loop: relay messages, a one-second scheduling tick, and
    /// shutdown requests. Returns when a shutdown is requested; a relay
    /// fatality (route write failure) propagates as an error.
    pub async fn run(&mut self) -> Result<RunExit, EngineError> {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                msg = self.relay_rx.recv() => {
                    let msg = msg.ok_or(EngineError::RelayClosed)?;
                    self.handle_relay(msg)?;
                    // Drain everything pending before sleeping again.
                    while let Ok(msg) = self.relay_rx.try_recv() {
                        self.handle_relay(msg)?;
                    }
                }
                kind = self.shutdown_rx.recv() => {
                    let kind = kind.unwrap_or(ShutdownKind::Stop);
                    return Ok(RunExit::Shutdown(kind));
                }
                _ = tick.tick() => self.tick()?,
            }
        }
    }

    /// Two-stage shutdown: disable the run queue, ask every live child to
    /// leave, then make the stragglers. Returns how many children
    /// survived the polite stage (0 means clean).
    pub async fn shutdown(&mut self) -> Result<u32, EngineError> {
        info!("starting shutdown");
        self.core.close().runq.disable();

        if self.core.close().meth.live_count() == 0 {
            return Ok(0);
        }
        self.core.close().meth.signal_children(true);
        self.drain_exits(SHUTDOWN_TERM_WAIT).await?;

        let survivors = self.core.close().meth.live_count() as u32;
        if survivors == 0 {
            return Ok(0);
        }
        warn!(survivors, "jobs did not shut down normally");
        self.core.close().meth.signal_children(false);
        self.drain_exits(SHUTDOWN_KILL_WAIT).await?;
        Ok(survivors)
    }

    async fn drain_exits(&mut self, budget: Duration) -> Result<(), EngineError> {
        let deadline = tokio::time::Instant::now() + budget;
        while self.core.close().meth.live_count() > 0 {
            match tokio::time::timeout_at(deadline, self.relay_rx.recv()).await {
                Ok(Some(msg)) => self.handle_relay(msg)?,
                Ok(None) => break,
                Err(_) => break,
            }
        }
        Ok(())
    }
}

/// Wire the standing handlers: method completion finalises expired work,
/// work expiry drops the job row.
fn wire(bus: &mut Callbacks<EngineCore>) {
    bus.register(meth::CB_FINISHED, |core: &mut EngineCore, args| {
        let Some(key) = args.first().and_then(Payload::as_key) else {
            return;
        };
        let key = key.to_string();
        let EngineCore {
            runq, meth, later, ..
        } = core;
        for id in runq.on_method_finished(&key, meth) {
            later.push(runq::CB_EXPIRED, vec![Payload::Id(id.as_i64())]);
        }
    });
    bus.register(runq::CB_EXPIRED, |core: &mut EngineCore, args| {
        if let Some(id) = args.first().and_then(Payload::as_id) {
            core.jobs.remove_row(WorkId(id));
        }
    });
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
