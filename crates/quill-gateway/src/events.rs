//! Subscriber registry for status and event fan-out.
//!
//! Callbacks run synchronously on the thread that emits. Each emit works on a
//! snapshot of the registered callbacks, so subscribing or unsubscribing from
//! inside a callback is safe, and a panicking callback is logged and skipped
//! without affecting delivery to the rest.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A list of callbacks sharing one value type.
pub(crate) struct Observers<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback<T>)>>,
    label: &'static str,
}

impl<T: 'static> Observers<T> {
    pub(crate) fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
            label,
        })
    }

    /// Register a callback; it stays registered until the returned
    /// subscription is cancelled.
    pub(crate) fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, Arc::new(callback)));

        let weak: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(observers) = weak.upgrade() {
                observers.entries.lock().retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Register a callback and hand it `current` right away.
    pub(crate) fn subscribe_and_replay<F>(self: &Arc<Self>, callback: F, current: &T) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let registered = Arc::clone(&callback);
        let subscription = self.subscribe(move |value| registered(value));
        self.deliver(&callback, current);
        subscription
    }

    /// Deliver a value to every callback registered at the time of the call.
    pub(crate) fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            self.deliver(&callback, value);
        }
    }

    fn deliver(&self, callback: &Callback<T>, value: &T) {
        if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
            warn!(kind = self.label, "subscriber panicked; continuing delivery");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Handle returned by `on_event` / `on_status`.
///
/// Dropping the handle keeps the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the callback. Idempotent with respect to the client: after this
    /// returns the callback receives no further values.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let observers = Observers::<u32>::new("test");
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = Arc::clone(&total);
            let _sub = observers.subscribe(move |v| {
                total.fetch_add(*v as usize, Ordering::SeqCst);
            });
        }

        observers.emit(&5);
        assert_eq!(total.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let observers = Observers::<&'static str>::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        let _a = observers.subscribe(move |v| first.lock().push(format!("a:{v}")));
        let _b = observers.subscribe(|_| panic!("subscriber failure"));
        let last = Arc::clone(&seen);
        let _c = observers.subscribe(move |v| last.lock().push(format!("c:{v}")));

        observers.emit(&"one");
        observers.emit(&"two");

        assert_eq!(
            *seen.lock(),
            vec!["a:one", "c:one", "a:two", "c:two"]
        );
        assert_eq!(observers.len(), 3);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let observers = Observers::<u32>::new("test");
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        let sub = observers.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        observers.emit(&1);
        sub.unsubscribe();
        observers.emit(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(observers.len(), 0);
    }

    #[test]
    fn test_subscribe_during_emit_sees_next_value_only() {
        let observers = Observers::<u32>::new("test");
        let late_hits = Arc::new(AtomicUsize::new(0));

        let registry = Arc::clone(&observers);
        let hits = Arc::clone(&late_hits);
        let _outer = observers.subscribe(move |v| {
            if *v == 1 {
                let hits = Arc::clone(&hits);
                let _inner = registry.subscribe(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        observers.emit(&1);
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);

        observers.emit(&2);
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replay_delivers_current_value_first() {
        let observers = Observers::<u32>::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _sub = observers.subscribe_and_replay(move |v| sink.lock().push(*v), &7);
        observers.emit(&8);

        assert_eq!(*seen.lock(), vec![7, 8]);
    }

    #[test]
    fn test_replay_isolates_panics() {
        let observers = Observers::<u32>::new("test");
        let sub = observers.subscribe_and_replay(|_| panic!("boom"), &1);
        assert_eq!(observers.len(), 1);
        sub.unsubscribe();
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let observers = Observers::<u32>::new("test");
        let sub = observers.subscribe(|_| {});
        drop(observers);
        sub.unsubscribe();
    }
}
