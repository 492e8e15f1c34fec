//! Generic event system shared by every cmdretry component.
//!
//! Mirrors the event-listener plumbing used across the original
//! resilience-middleware workspace this crate grew out of: a small trait for
//! "things that happened", a listener trait, and a panic-tolerant broadcaster.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Trait for events emitted by cmdretry components (backoff, scheduler,
/// coordinator, client).
pub trait CmdRetryEvent: Send + Sync + fmt::Debug {
    /// Machine-readable event type, e.g. `"retry"`, `"schedule_rejected"`.
    fn event_type(&self) -> &'static str;

    /// When the event occurred.
    fn timestamp(&self) -> Instant;
}

/// Trait for listening to cmdretry events.
pub trait EventListener<E: CmdRetryEvent>: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &E);
}

/// Type alias for boxed event listeners.
pub type BoxedEventListener<E> = Arc<dyn EventListener<E>>;

/// A function-backed [`EventListener`].
pub struct FnListener<F> {
    f: F,
}

impl<F> FnListener<F> {
    /// Wraps a closure as an event listener.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<E, F> EventListener<E> for FnListener<F>
where
    E: CmdRetryEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event);
    }
}

/// A collection of event listeners, cloned cheaply via `Arc`.
#[derive(Clone)]
pub struct EventListeners<E: CmdRetryEvent> {
    listeners: Vec<BoxedEventListener<E>>,
}

impl<E: CmdRetryEvent> EventListeners<E> {
    /// Creates an empty listener collection.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Registers a listener.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to every registered listener.
    ///
    /// A panicking listener is caught so it can't take down the others;
    /// the panic is swallowed here (not re-thrown) since listeners are
    /// side-channel observability, not load-bearing control flow. With the
    /// `metrics` feature enabled a counter is incremented for observability.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));

            #[cfg(feature = "metrics")]
            if result.is_err() {
                record_listener_panic_metric(event);
            }
            #[cfg(not(feature = "metrics"))]
            let _ = result;
        }
    }

    /// True if no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: CmdRetryEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "metrics")]
fn record_listener_panic_metric<E: CmdRetryEvent>(event: &E) {
    let event_type_label = event.event_type().to_string();
    metrics::counter!(
        "cmdretry_event_listener_panics_total",
        "event_type" => event_type_label
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestEvent;

    impl CmdRetryEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            "test"
        }
        fn timestamp(&self) -> Instant {
            Instant::now()
        }
    }

    #[test]
    fn emits_to_all_listeners() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut listeners = EventListeners::new();
        for _ in 0..3 {
            let c = Arc::clone(&count);
            listeners.add(FnListener::new(move |_: &TestEvent| {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        listeners.emit(&TestEvent);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(|_: &TestEvent| {
            panic!("boom");
        }));
        let c = Arc::clone(&count);
        listeners.add(FnListener::new(move |_: &TestEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        listeners.emit(&TestEvent);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
