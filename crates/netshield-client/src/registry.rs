//! Subscriber sets with removal tokens.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback<T>>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64) -> bool;
}

impl<T: 'static> Detach for Mutex<Slots<T>> {
    fn detach(&self, id: u64) -> bool {
        self.lock().callbacks.remove(&id).is_some()
    }
}

/// A set of callbacks for one event class.
pub(crate) struct Registry<T> {
    label: &'static str,
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T: 'static> Registry<T> {
    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            label,
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                callbacks: BTreeMap::new(),
            })),
        }
    }

    pub(crate) fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut slots = self.slots.lock();
            let id = slots.next_id;
            slots.next_id += 1;
            let _ = slots.callbacks.insert(id, Arc::new(callback));
            id
        };
        let slots: Weak<dyn Detach> = Arc::downgrade(&self.slots) as Weak<dyn Detach>;
        Subscription { id, slots }
    }

    /// Deliver `value` to every subscriber. A panicking callback is logged
    /// and does not stop delivery to the rest. Returns how many callbacks
    /// completed normally.
    pub(crate) fn notify(&self, value: &T) -> usize {
        self.notify_while(value, || true)
    }

    /// Like `notify`, but stops as soon as `current` returns false. Checked
    /// before each callback, so a callback that supersedes `value` keeps it
    /// from reaching the remaining subscribers.
    pub(crate) fn notify_while(&self, value: &T, current: impl Fn() -> bool) -> usize {
        // Snapshot so callbacks can subscribe/unsubscribe without deadlocking.
        let callbacks: Vec<Callback<T>> = self.slots.lock().callbacks.values().cloned().collect();
        let mut delivered = 0;
        for callback in &callbacks {
            if !current() {
                tracing::debug!(subscribers = self.label, "notification superseded");
                break;
            }
            if call_guarded(self.label, callback.as_ref(), value) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Run one callback with the same isolation as `notify`.
    pub(crate) fn deliver_to(&self, callback: &(dyn Fn(&T) + Send + Sync), value: &T) -> bool {
        call_guarded(self.label, callback, value)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().callbacks.len()
    }
}

fn call_guarded<T>(label: &str, callback: &(dyn Fn(&T) + Send + Sync), value: &T) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!(
                subscribers = label,
                "subscriber callback panicked: {}",
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic>"
    }
}

/// Handle returned by every `on_*` method.
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
/// The handle does not keep the manager alive.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    slots: Weak<dyn Detach>,
}

impl Subscription {
    /// Remove the callback. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(slots) = self.slots.upgrade() {
            let _ = slots.detach(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
