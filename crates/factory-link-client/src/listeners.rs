//! Listener registry with explicit removal tokens.

use crate::lock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Token returned by registration; pass it back to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Table<E> {
    next_id: u64,
    handlers: Vec<(ListenerId, Handler<E>)>,
}

/// Fan-out registry: every emitted event reaches every registered handler.
pub struct Listeners<E> {
    table: Mutex<Table<E>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            table: Mutex::new(Table {
                next_id: 0,
                handlers: Vec::new(),
            }),
        }
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let mut table = lock(&self.table);
        let id = ListenerId(table.next_id);
        table.next_id += 1;
        table.handlers.push((id, Arc::new(handler)));
        id
    }

    /// Returns whether a listener with `id` was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut table = lock(&self.table);
        let before = table.handlers.len();
        table.handlers.retain(|(existing, _)| *existing != id);
        table.handlers.len() != before
    }

    pub fn clear(&self) {
        lock(&self.table).handlers.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.table).handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every handler with `event`. Handlers run outside the registry
    /// lock, so they may add or remove listeners. A panicking handler is
    /// logged and skipped; the others still run.
    pub fn emit(&self, event: &E) {
        let handlers: Vec<(ListenerId, Handler<E>)> = lock(&self.table).handlers.clone();
        for (id, handler) in handlers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                let reason = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("non-string panic");
                warn!(listener = id.0, reason, "listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fan_out_and_remove() {
        let listeners = Listeners::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t = total.clone();
        let first = listeners.add(move |n| {
            t.fetch_add(*n as usize, Ordering::SeqCst);
        });
        let t = total.clone();
        listeners.add(move |n| {
            t.fetch_add(*n as usize * 10, Ordering::SeqCst);
        });

        listeners.emit(&1);
        assert_eq!(total.load(Ordering::SeqCst), 11);

        assert!(listeners.remove(first));
        assert!(!listeners.remove(first));
        listeners.emit(&1);
        assert_eq!(total.load(Ordering::SeqCst), 21);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn ids_are_not_reused_after_clear() {
        let listeners = Listeners::<()>::new();
        let a = listeners.add(|_| {});
        listeners.clear();
        assert!(listeners.is_empty());
        let b = listeners.add(|_| {});
        assert_ne!(a, b);
        assert!(!listeners.remove(a));
    }

    #[test]
    fn handler_may_register_during_emit() {
        let listeners = Arc::new(Listeners::<()>::new());
        let inner = listeners.clone();
        listeners.add(move |_| {
            inner.add(|_| {});
        });
        listeners.emit(&());
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn panicking_handler_does_not_stop_the_others() {
        let listeners = Listeners::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));
        listeners.add(|_| panic!("listener bug"));
        let t = total.clone();
        listeners.add(move |n| {
            t.fetch_add(*n as usize, Ordering::SeqCst);
        });

        listeners.emit(&2);
        listeners.emit(&3);
        assert_eq!(total.load(Ordering::SeqCst), 5);
        assert_eq!(listeners.len(), 2);
    }
}
