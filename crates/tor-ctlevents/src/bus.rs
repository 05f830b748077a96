//! The event bus: copy-on-write observer lists, snapshot dispatch.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::observer::{Observer, ObserverTag, OnEvent};
use crate::runtime_event::{EventKey, RuntimeEvent};
use crate::uncaught::{default_uncaught_handler, Collector, UncaughtHandler};

/// A handle to one subscription, returned by
/// [`EventBus::subscribe`] and accepted by [`EventBus::unsubscribe`].
///
/// Dropping the handle does *not* unsubscribe; the observer lives until
/// it is removed or the bus is dropped.
#[derive(Clone, Debug)]
pub struct Subscription {
    /// The registered observer.  Identity (pointer) equality is what
    /// `unsubscribe` matches on.
    observer: Arc<Observer>,
}

impl Subscription {
    /// The observer's tag, if any.
    pub fn tag(&self) -> Option<&ObserverTag> {
        self.observer.tag()
    }
}

/// The per-instance event bus.
///
/// Subscription and removal copy the affected per-key list; dispatch
/// clones the current list's `Arc` and iterates that snapshot with no
/// lock held, so observers added or removed mid-dispatch never affect
/// an iteration already underway.
pub struct EventBus {
    /// Immutable observer lists, per key.
    observers: Mutex<HashMap<EventKey, Arc<[Arc<Observer>]>>>,
    /// Where observer panics are routed.
    handler: UncaughtHandler,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// A bus with the default (logging) uncaught handler.
    pub fn new() -> Self {
        Self::with_handler(default_uncaught_handler())
    }

    /// A bus routing uncaught errors to `handler`.
    pub fn with_handler(handler: UncaughtHandler) -> Self {
        EventBus {
            observers: Mutex::new(HashMap::new()),
            handler,
        }
    }

    /// Register `observer`, returning its handle.
    pub fn subscribe(&self, observer: Observer) -> Subscription {
        let observer = Arc::new(observer);
        let mut map = self.observers.lock().expect("event bus poisoned");
        let list = map
            .entry(observer.key())
            .or_insert_with(|| Arc::from(Vec::new()));
        let mut copy: Vec<Arc<Observer>> = list.iter().cloned().collect();
        copy.push(Arc::clone(&observer));
        *list = Arc::from(copy);
        Subscription { observer }
    }

    /// Remove exactly the observer behind `subscription`.
    ///
    /// Unlike the by-tag form this removes static observers too; only
    /// whoever holds the handle can do that.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.retain(|obs| !Arc::ptr_eq(obs, &subscription.observer));
    }

    /// Remove every observer whose tag equals `tag`, except static ones.
    pub fn unsubscribe_all_by_tag(&self, tag: &ObserverTag) {
        if tag.is_static() {
            trace!("ignoring unsubscribe-all for static tag {}", tag);
            return;
        }
        self.retain(|obs| obs.tag() != Some(tag));
    }

    /// The number of observers currently registered for `key`.
    pub fn observer_count(&self, key: EventKey) -> usize {
        self.observers
            .lock()
            .expect("event bus poisoned")
            .get(&key)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Dispatch `event` to every observer of its key, in registration
    /// order.
    ///
    /// Immediate observers run before this returns; dispatched ones are
    /// handed to the async runtime (falling back to immediate when no
    /// runtime is on this thread).  A panicking observer does not stop
    /// the fan-out: panics are collected and surfaced once, through the
    /// uncaught handler.
    pub fn publish(&self, event: &RuntimeEvent) {
        let snapshot = {
            let map = self.observers.lock().expect("event bus poisoned");
            map.get(&event.key()).cloned()
        };
        let Some(snapshot) = snapshot else {
            return;
        };
        let mut errors = Collector::default();
        for obs in snapshot.iter() {
            match obs.execute() {
                OnEvent::Immediate => {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| obs.notify(event))) {
                        errors.push("event dispatch", describe_panic(&panic));
                    }
                }
                OnEvent::Dispatched => match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        let obs = Arc::clone(obs);
                        let event = event.clone();
                        let handler = Arc::clone(&self.handler);
                        handle.spawn(async move {
                            if let Err(panic) =
                                catch_unwind(AssertUnwindSafe(|| obs.notify(&event)))
                            {
                                let mut errors = Collector::default();
                                errors.push("event dispatch", describe_panic(&panic));
                                errors.surface(&handler);
                            }
                        });
                    }
                    Err(_) => {
                        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| obs.notify(event))) {
                            errors.push("event dispatch", describe_panic(&panic));
                        }
                    }
                },
            }
        }
        errors.surface(&self.handler);
    }

    /// Keep only the observers `keep` approves of, copying each touched
    /// list.
    fn retain<F>(&self, keep: F)
    where
        F: Fn(&Arc<Observer>) -> bool,
    {
        let mut map = self.observers.lock().expect("event bus poisoned");
        for list in map.values_mut() {
            if list.iter().all(&keep) {
                continue;
            }
            let copy: Vec<Arc<Observer>> = list.iter().filter(|o| keep(*o)).cloned().collect();
            *list = Arc::from(copy);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count: usize = self
            .observers
            .lock()
            .map(|m| m.values().map(|l| l.len()).sum())
            .unwrap_or(0);
        f.debug_struct("EventBus")
            .field("observers", &count)
            .finish_non_exhaustive()
    }
}

/// Render a panic payload for the uncaught handler.
fn describe_panic(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("observer panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("observer panicked: {s}")
    } else {
        "observer panicked".to_owned()
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;
    use crate::runtime_event::{LogEvent, LogLevel};
    use crate::uncaught::UncaughtError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn log_event(msg: &str) -> RuntimeEvent {
        RuntimeEvent::Log(LogEvent::new(LogLevel::Info, msg))
    }

    fn counting_observer(counter: Arc<AtomicUsize>) -> Observer {
        Observer::new(EventKey::Log, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .executing(OnEvent::Immediate)
    }

    #[test]
    fn fan_out_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            bus.subscribe(
                Observer::new(EventKey::Log, move |_| {
                    order.lock().unwrap().push(i);
                })
                .executing(OnEvent::Immediate),
            );
        }
        bus.publish(&log_event("x"));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn events_route_by_key() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(counting_observer(Arc::clone(&count)));
        bus.publish(&log_event("seen"));
        bus.publish(&RuntimeEvent::State(crate::state::TorState::off()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_by_handle() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sub = bus.subscribe(counting_observer(Arc::clone(&count)));
        bus.publish(&log_event("one"));
        bus.unsubscribe(&sub);
        bus.publish(&log_event("two"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.observer_count(EventKey::Log), 0);
    }

    #[test]
    fn unsubscribe_all_by_tag_spares_static() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let tag = ObserverTag::new("ui");
        let static_tag = ObserverTag::new_static("runtime");

        bus.subscribe(counting_observer(Arc::clone(&count)).tagged(tag.clone()));
        bus.subscribe(counting_observer(Arc::clone(&count)).tagged(tag.clone()));
        let static_sub =
            bus.subscribe(counting_observer(Arc::clone(&count)).tagged(static_tag.clone()));

        bus.unsubscribe_all_by_tag(&tag);
        assert_eq!(bus.observer_count(EventKey::Log), 1);

        // A caller cannot bulk-remove static observers...
        bus.unsubscribe_all_by_tag(&static_tag);
        assert_eq!(bus.observer_count(EventKey::Log), 1);

        // ...but the handle-holder can.
        bus.unsubscribe(&static_sub);
        assert_eq!(bus.observer_count(EventKey::Log), 0);
    }

    #[test]
    fn panicking_observer_does_not_stop_fanout() {
        let seen: Arc<Mutex<Vec<UncaughtError>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let bus = EventBus::with_handler(Arc::new(move |e| seen2.lock().unwrap().push(e)));

        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            Observer::new(EventKey::Log, |_| panic!("observer one"))
                .executing(OnEvent::Immediate),
        );
        bus.subscribe(counting_observer(Arc::clone(&count)));

        bus.publish(&log_event("x"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].primary.contains("observer one"));
    }

    #[test]
    fn removal_during_dispatch_keeps_current_iteration() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let tag = ObserverTag::new("self-removing");

        // First observer unsubscribes everything with the tag; the
        // second, same-tagged, must still see the in-flight event.
        let bus2 = Arc::clone(&bus);
        let tag2 = tag.clone();
        bus.subscribe(
            Observer::new(EventKey::Log, move |_| {
                bus2.unsubscribe_all_by_tag(&tag2);
            })
            .executing(OnEvent::Immediate),
        );
        bus.subscribe(counting_observer(Arc::clone(&count)).tagged(tag.clone()));

        bus.publish(&log_event("x"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // After dispatch, the tagged observer is gone.
        bus.publish(&log_event("y"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatched_observers_run_on_the_runtime() {
        let bus = EventBus::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<String>();
        let tx = Mutex::new(Some(tx));
        bus.subscribe(Observer::new(EventKey::Log, move |event| {
            if let RuntimeEvent::Log(log) = event {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(log.message.clone());
                }
            }
        }));
        bus.publish(&log_event("hello"));
        let got = tokio::time::timeout(std::time::Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, "hello");
    }
}
