//! Event dispatcher
//!
//! Handlers are registered per [`EventKind`] (or for every event) and run
//! either inline or as independent tokio tasks. A panicking handler is logged
//! and never reaches the caller of [`Dispatcher::dispatch`].

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use super::{Event, EventKind};

/// Callback invoked with each matching event
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// How handlers are run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Inline; dispatch returns after every handler has run
    Sync,
    /// One spawned task per handler invocation; dispatch does not wait
    Concurrent,
}

struct Registration {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    wildcard: RwLock<Vec<Registration>>,
    persistent: RwLock<HashMap<EventKind, Vec<Registration>>>,
    once: RwLock<HashMap<EventKind, Vec<Registration>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl Registry {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn remove(&self, slot: Slot, id: u64) -> bool {
        fn retain(list: &mut Vec<Registration>, id: u64) -> bool {
            let before = list.len();
            list.retain(|r| r.id != id);
            list.len() != before
        }

        match slot {
            Slot::Wildcard => retain(&mut write(&self.wildcard), id),
            Slot::Persistent(kind) => write(&self.persistent)
                .get_mut(&kind)
                .map(|list| retain(list, id))
                .unwrap_or(false),
            Slot::Once(kind) => write(&self.once)
                .get_mut(&kind)
                .map(|list| retain(list, id))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Wildcard,
    Persistent(EventKind),
    Once(EventKind),
}

/// Removes exactly one registration when cancelled
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Registry>,
    slot: Slot,
    id: u64,
}

impl Subscription {
    /// Unregister the handler; returns false if it was already gone
    pub fn cancel(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.slot, self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("wildcard", &read(&self.wildcard).len())
            .field("persistent", &read(&self.persistent).len())
            .field("once", &read(&self.once).len())
            .finish()
    }
}

/// Fans events out to registered handlers
#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    mode: DeliveryMode,
}

impl Dispatcher {
    pub fn new(mode: DeliveryMode) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            mode,
        }
    }

    /// Register a handler for every event of `kind`
    pub fn register<F>(&self, kind: impl Into<EventKind>, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let kind = kind.into();
        let id = self.registry.next_id();
        write(&self.registry.persistent)
            .entry(kind)
            .or_default()
            .push(Registration { id, handler: Arc::new(handler) });
        self.subscription(Slot::Persistent(kind), id)
    }

    /// Register a handler for the next event of `kind` only
    pub fn register_once<F>(&self, kind: impl Into<EventKind>, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let kind = kind.into();
        let id = self.registry.next_id();
        write(&self.registry.once)
            .entry(kind)
            .or_default()
            .push(Registration { id, handler: Arc::new(handler) });
        self.subscription(Slot::Once(kind), id)
    }

    /// Register a handler for every event
    pub fn register_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.registry.next_id();
        write(&self.registry.wildcard).push(Registration { id, handler: Arc::new(handler) });
        self.subscription(Slot::Wildcard, id)
    }

    fn subscription(&self, slot: Slot, id: u64) -> Subscription {
        Subscription {
            registry: Arc::downgrade(&self.registry),
            slot,
            id,
        }
    }

    /// Deliver an event: wildcard handlers, then handlers for its kind, then
    /// once-handlers (which are removed as they are taken)
    pub fn dispatch(&self, event: Event) {
        let kind = event.kind();

        // Snapshot under the locks so handlers may register or cancel freely
        let mut handlers: Vec<Handler> = read(&self.registry.wildcard)
            .iter()
            .map(|r| r.handler.clone())
            .collect();
        if let Some(list) = read(&self.registry.persistent).get(&kind) {
            handlers.extend(list.iter().map(|r| r.handler.clone()));
        }
        if let Some(list) = write(&self.registry.once).remove(&kind) {
            handlers.extend(list.into_iter().map(|r| r.handler));
        }

        if handlers.is_empty() {
            return;
        }

        match self.mode {
            DeliveryMode::Sync => {
                for handler in &handlers {
                    invoke(handler, &event, kind);
                }
            }
            DeliveryMode::Concurrent => {
                let event = Arc::new(event);
                for handler in handlers {
                    let event = event.clone();
                    tokio::spawn(async move {
                        invoke(&handler, &event, kind);
                    });
                }
            }
        }
    }
}

fn invoke(handler: &Handler, event: &Event, kind: EventKind) {
    if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
        tracing::warn!("Event handler for {:?} panicked", kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ResponseKind, ResponsePacket};
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&Event) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = log.clone();
            move |tag: &str| {
                let log = log.clone();
                let tag = tag.to_string();
                Box::new(move |_: &Event| log.lock().unwrap().push(tag.clone()))
                    as Box<dyn Fn(&Event) + Send + Sync>
            }
        };
        (log, make)
    }

    fn pong() -> Event {
        Event::Packet(ResponsePacket::Pong { token: 1 })
    }

    #[test]
    fn test_dispatch_order() {
        let dispatcher = Dispatcher::new(DeliveryMode::Sync);
        let (log, make) = recorder();

        dispatcher.register_once(ResponseKind::Pong, make("once"));
        dispatcher.register(ResponseKind::Pong, make("specific"));
        dispatcher.register_all(make("wildcard"));
        dispatcher.register(ResponseKind::Date, make("other"));

        dispatcher.dispatch(pong());
        assert_eq!(*log.lock().unwrap(), vec!["wildcard", "specific", "once"]);
    }

    #[test]
    fn test_once_fires_once() {
        let dispatcher = Dispatcher::new(DeliveryMode::Sync);
        let (log, make) = recorder();

        dispatcher.register_once(EventKind::Connect, make("connect"));
        dispatcher.dispatch(Event::Connect);
        dispatcher.dispatch(Event::Connect);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_cancel_removes_only_that_handler() {
        let dispatcher = Dispatcher::new(DeliveryMode::Sync);
        let (log, make) = recorder();

        let first = dispatcher.register(ResponseKind::Pong, make("first"));
        dispatcher.register(ResponseKind::Pong, make("second"));

        assert!(first.cancel());
        dispatcher.dispatch(pong());
        assert_eq!(*log.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_cancel_after_once_fired() {
        let dispatcher = Dispatcher::new(DeliveryMode::Sync);
        let (_log, make) = recorder();

        let sub = dispatcher.register_once(ResponseKind::Pong, make("once"));
        dispatcher.dispatch(pong());
        assert!(!sub.cancel());
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let dispatcher = Dispatcher::new(DeliveryMode::Sync);
        let (log, make) = recorder();

        dispatcher.register(ResponseKind::Pong, |_: &Event| panic!("boom"));
        dispatcher.register(ResponseKind::Pong, make("after"));

        dispatcher.dispatch(pong());
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[tokio::test]
    async fn test_concurrent_delivery() {
        let dispatcher = Dispatcher::new(DeliveryMode::Concurrent);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        dispatcher.register(ResponseKind::Pong, move |event: &Event| {
            let _ = tx.send(event.clone());
        });
        dispatcher.dispatch(pong());

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, pong());
    }
}
