// SPDX-License-Identifier: GPL-3.0-only

//! Observer registry used for all engine events
//!
//! Producers emit by reference; handlers run synchronously on the emitting
//! thread in registration order. A handler is removed when the [`Subscription`]
//! returned by `subscribe` is dropped. Emission snapshots the handler list and
//! invokes it outside the registry lock, so a handler may subscribe or drop
//! subscriptions without deadlocking.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    handlers: Mutex<BTreeMap<u64, Handler<T>>>,
    next_id: AtomicU64,
}

/// A broadcast point for one event type
pub struct EventHub<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Clone for EventHub<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventHub<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                handlers: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a handler; it stays active until the returned handle drops
    #[must_use = "dropping the subscription immediately deregisters the handler"]
    pub fn subscribe<F>(&self, handler: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .handlers
            .lock()
            .unwrap()
            .insert(id, Arc::new(handler));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every current handler, in registration order
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Handler<T>> = {
            let handlers = self.registry.handlers.lock().unwrap();
            handlers.values().cloned().collect()
        };
        for handler in snapshot {
            handler(event);
        }
    }

    /// Number of active handlers
    pub fn handler_count(&self) -> usize {
        self.registry.handlers.lock().unwrap().len()
    }
}

/// RAII handle for a registered handler
pub struct Subscription<T> {
    id: u64,
    registry: Weak<Registry<T>>,
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.handlers.lock().unwrap().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_emit_reaches_all_handlers() {
        let hub: EventHub<u32> = EventHub::new();
        let seen = Arc::new(AtomicU32::new(0));

        let seen_a = Arc::clone(&seen);
        let _sub_a = hub.subscribe(move |v| {
            seen_a.fetch_add(*v, Ordering::SeqCst);
        });
        let seen_b = Arc::clone(&seen);
        let _sub_b = hub.subscribe(move |v| {
            seen_b.fetch_add(*v, Ordering::SeqCst);
        });

        hub.emit(&3);
        assert_eq!(seen.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_dropped_subscription_deregisters() {
        let hub: EventHub<u32> = EventHub::new();
        let seen = Arc::new(AtomicU32::new(0));

        let seen_clone = Arc::clone(&seen);
        let sub = hub.subscribe(move |v| {
            seen_clone.fetch_add(*v, Ordering::SeqCst);
        });
        hub.emit(&1);
        drop(sub);
        hub.emit(&1);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(hub.handler_count(), 0);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let hub: EventHub<()> = EventHub::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = Arc::clone(&order);
        let _sub_a = hub.subscribe(move |_| order_a.lock().unwrap().push("a"));
        let order_b = Arc::clone(&order);
        let _sub_b = hub.subscribe(move |_| order_b.lock().unwrap().push("b"));

        hub.emit(&());
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_handler_may_drop_subscription_during_emit() {
        let hub: EventHub<()> = EventHub::new();
        let slot: Arc<Mutex<Option<Subscription<()>>>> = Arc::new(Mutex::new(None));

        let slot_clone = Arc::clone(&slot);
        let sub = hub.subscribe(move |_| {
            // Self-removal mid-emit must not deadlock
            slot_clone.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        hub.emit(&());
        assert_eq!(hub.handler_count(), 0);
    }
}
