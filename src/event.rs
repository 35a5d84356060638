//! Event-loop integration: per-endpoint readiness notifications for a
//! cooperative, single-threaded event loop to subscribe to.
//!
//! This crate does not ship an event loop — only the hooks one would
//! need: [`EventLink::subscribe`]/[`EventLink::unsubscribe`] to
//! register a wakeup callback, and [`EventLink::notify`] for the pipe
//! core to call when a readiness edge is crossed.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

type Callback = Box<dyn Fn() + Send + Sync>;

/// Which direction of readiness a [`EventLink`] tracks.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Event {
    /// At least `trigger_level` bytes are available to receive.
    Readable,
    /// At least one byte of space is available to send.
    Writable,
}

/// A single readiness notification channel.
///
/// An event loop subscribes with [`EventLink::subscribe`]; the pipe
/// core wakes it with [`EventLink::notify`] whenever the relevant
/// readiness edge is crossed. `generation` lets a poll-based event
/// loop detect a missed wakeup without needing a callback at all.
#[derive(Default)]
pub struct EventLink {
    callback: Mutex<Option<Callback>>,
    generation: AtomicU64,
}

impl EventLink {
    pub(crate) fn new() -> Self {
        Self {
            callback: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Register a callback to run whenever this link is notified.
    /// Replaces any previously registered callback.
    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.callback.lock() = Some(Box::new(callback));
    }

    /// Remove any registered callback. Required before the owning
    /// endpoint is freed.
    pub fn unsubscribe(&self) {
        *self.callback.lock() = None;
    }

    /// Whether a callback is currently registered.
    pub fn is_subscribed(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Monotonically increasing counter, bumped on every [`EventLink::notify`].
    /// Lets a polling event loop detect "something happened" without a callback.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Bump the generation counter and invoke the registered callback,
    /// if any. Called by the pipe core; never by user code directly.
    pub(crate) fn notify(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(callback) = self.callback.lock().as_ref() {
            callback();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn notify_without_subscriber_is_a_noop() {
        let link = EventLink::new();
        link.notify();
        assert_eq!(link.generation(), 1);
    }

    #[test]
    fn subscribe_runs_callback_on_notify() {
        let link = EventLink::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        link.subscribe(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        link.notify();
        link.notify();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_callbacks() {
        let link = EventLink::new();
        link.subscribe(|| panic!("should not run"));
        link.unsubscribe();
        assert!(!link.is_subscribed());
        link.notify();
    }
}
