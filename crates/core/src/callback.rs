// SPDX-License-Identifier: MIT

//! Process-wide event bus.
//!
//! Events are named by strings and declared implicitly on first use.
//! Interested parties register handlers against a name; raising an event
//! invokes the handlers synchronously, in registration order, on the
//! caller's context. Raising a name nobody registered for is a silent
//! no-op.
//!
//! Handlers receive a mutable borrow of a caller-supplied context value, so
//! the engine's tables can be mutated from a handler without interior
//! locking. A handler that needs to raise a further event queues it through
//! the context (see `RaiseQueue`) and the caller drains the queue after the
//! top-level raise returns.

use std::collections::HashMap;

/// Discriminated handler argument.
///
/// Events carry up to four of these; emitter and handler agree on the
/// meaning per event name.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    /// A work id.
    Id(i64),
    /// A descriptor or connection token.
    Fd(i32),
    /// An invocation key.
    Key(String),
    Text(String),
}

impl Payload {
    pub fn as_id(&self) -> Option<i64> {
        match self {
            Payload::Id(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            Payload::Key(s) => Some(s),
            _ => None,
        }
    }
}

/// Handle returned by [`Callbacks::register`], used to deregister.
pub type HandlerId = u64;

type Handler<Ctx> = Box<dyn FnMut(&mut Ctx, &[Payload]) + Send>;

/// Registry mapping event names to ordered handler lists.
pub struct Callbacks<Ctx> {
    events: HashMap<String, Vec<(HandlerId, Handler<Ctx>)>>,
    next_handler: HandlerId,
}

impl<Ctx> Default for Callbacks<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx> Callbacks<Ctx> {
    pub fn new() -> Self {
        Self {
            events: HashMap::new(),
            next_handler: 1,
        }
    }

    /// Register a handler against an event name.
    ///
    /// The event is declared implicitly if this is its first mention.
    pub fn register<F>(&mut self, event: &str, handler: F) -> HandlerId
    where
        F: FnMut(&mut Ctx, &[Payload]) + Send + 'static,
    {
        let id = self.next_handler;
        self.next_handler += 1;
        self.events
            .entry(event.to_string())
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Remove a previously registered handler. Returns false if the
    /// event or handler was unknown.
    pub fn deregister(&mut self, event: &str, id: HandlerId) -> bool {
        match self.events.get_mut(event) {
            Some(handlers) => {
                let before = handlers.len();
                handlers.retain(|(hid, _)| *hid != id);
                handlers.len() != before
            }
            None => false,
        }
    }

    /// Invoke every handler registered for `event`, in registration order.
    ///
    /// Returns the number of handlers invoked; an unknown event returns 0.
    pub fn raise(&mut self, ctx: &mut Ctx, event: &str, args: &[Payload]) -> usize {
        let Some(handlers) = self.events.get_mut(event) else {
            return 0;
        };
        let mut invoked = 0;
        for (_, handler) in handlers.iter_mut() {
            handler(ctx, args);
            invoked += 1;
        }
        invoked
    }

    /// Number of handlers currently registered for `event`.
    pub fn handler_count(&self, event: &str) -> usize {
        self.events.get(event).map_or(0, Vec::len)
    }
}

/// Follow-up raises queued by handlers.
///
/// A handler runs inside `raise` and therefore cannot re-enter the bus;
/// instead it pushes the follow-up event here and the engine drains the
/// queue once the top-level raise has returned.
#[derive(Default)]
pub struct RaiseQueue {
    pending: Vec<(String, Vec<Payload>)>,
}

impl RaiseQueue {
    pub fn push(&mut self, event: impl Into<String>, args: Vec<Payload>) {
        self.pending.push((event.into(), args));
    }

    pub fn drain(&mut self) -> Vec<(String, Vec<Payload>)> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
#[path = "callback_tests.rs"]
mod tests;
