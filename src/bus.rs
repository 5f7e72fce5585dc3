// src/bus.rs

//! Synchronous named pub/sub.
//!
//! Handlers run in registration order. Dispatch is reentrant: a handler may
//! subscribe, unsubscribe or emit while a fan-out is in progress, because the
//! subscriber list is snapshotted before the first handler runs.
//!
//! Failures are isolated around the whole fan-out rather than per handler: the
//! first handler that returns an error is logged and the remaining handlers
//! for that emit are skipped. Later emits are unaffected.
//!
//! While a [`Hold`] is alive, emits are queued and dispatched in order when
//! the last hold is released. Caches are mutated under a hold so handlers
//! never run while the emitting cache is borrowed.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::cache::Changes;
use crate::error::Result;
use crate::location::LocationContext;
use crate::models::{EntityKind, Snapshot, User};

/// Named event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Created(EntityKind),
    Updated(EntityKind),
    Deleted(EntityKind),
    FriendAdd,
    FriendDelete,
    LocationObserved,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Created(kind) => write!(f, "{}:CREATED", kind),
            Channel::Updated(kind) => write!(f, "{}:UPDATED", kind),
            Channel::Deleted(kind) => write!(f, "{}:DELETED", kind),
            Channel::FriendAdd => f.write_str("FRIEND:ADD"),
            Channel::FriendDelete => f.write_str("FRIEND:DELETE"),
            Channel::LocationObserved => f.write_str("LOCATION:OBSERVED"),
        }
    }
}

/// Event payloads.
#[derive(Debug, Clone)]
pub enum Event {
    /// First sight of a record.
    Created { record: Snapshot },
    /// A merge changed at least one scalar field.
    Updated { record: Snapshot, changes: Changes },
    /// A record left the cache index. Fires once per record.
    Deleted { record: Snapshot },
    FriendAdd { user: Box<User> },
    FriendDelete { user_id: String },
    /// A location seen outside the API (game log).
    LocationObserved {
        source: String,
        location: LocationContext,
        world_name: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn channel(&self) -> Channel {
        match self {
            Event::Created { record } => Channel::Created(record.kind()),
            Event::Updated { record, .. } => Channel::Updated(record.kind()),
            Event::Deleted { record } => Channel::Deleted(record.kind()),
            Event::FriendAdd { .. } => Channel::FriendAdd,
            Event::FriendDelete { .. } => Channel::FriendDelete,
            Event::LocationObserved { .. } => Channel::LocationObserved,
        }
    }
}

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Rc<dyn Fn(&Event) -> Result<()>>;

#[derive(Default)]
pub struct EventBus {
    next_id: Cell<u64>,
    subscribers: RefCell<HashMap<Channel, Vec<(SubscriptionId, Handler)>>>,
    holds: Cell<usize>,
    queued: RefCell<VecDeque<Event>>,
}

/// Defers dispatch until dropped. See [`EventBus::hold`].
pub struct Hold<'a> {
    bus: &'a EventBus,
}

impl Drop for Hold<'_> {
    fn drop(&mut self) {
        let holds = self.bus.holds.get().saturating_sub(1);
        self.bus.holds.set(holds);
        if holds == 0 {
            self.bus.flush();
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `channel`.
    pub fn on<F>(&self, channel: Channel, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<()> + 'static,
    {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscribers
            .borrow_mut()
            .entry(channel)
            .or_default()
            .push((id, Rc::new(handler)));
        id
    }

    /// Unsubscribe. Returns `false` if the subscription was not found.
    pub fn off(&self, channel: Channel, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let Some(handlers) = subscribers.get_mut(&channel) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        before != handlers.len()
    }

    /// Queue emits until the returned guard is dropped.
    pub fn hold(&self) -> Hold<'_> {
        self.holds.set(self.holds.get() + 1);
        Hold { bus: self }
    }

    /// Dispatch `event` to every handler of its channel, or queue it while
    /// held.
    pub fn emit(&self, event: Event) {
        if self.holds.get() > 0 {
            self.queued.borrow_mut().push_back(event);
            return;
        }
        self.dispatch(event);
    }

    fn flush(&self) {
        loop {
            let next = self.queued.borrow_mut().pop_front();
            match next {
                Some(event) => self.dispatch(event),
                None => break,
            }
        }
    }

    fn dispatch(&self, event: Event) {
        let channel = event.channel();
        let handlers: Vec<Handler> = match self.subscribers.borrow().get(&channel) {
            Some(list) => list.iter().map(|(_, h)| Rc::clone(h)).collect(),
            None => return,
        };

        let fan_out = || -> Result<()> {
            for handler in &handlers {
                handler(&event)?;
            }
            Ok(())
        };

        if let Err(e) = fan_out() {
            log::error!("Handler for {} failed: {}", channel, e);
        }
    }

    /// Number of handlers on `channel`.
    pub fn listener_count(&self, channel: Channel) -> usize {
        self.subscribers
            .borrow()
            .get(&channel)
            .map_or(0, |list| list.len())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self.subscribers.borrow();
        f.debug_struct("EventBus")
            .field("channels", &subscribers.len())
            .finish()
    }
}
