//! Transport-facing channel abstractions.
//!
//! The transport layer (a WebRTC stack, a socket server, or the in-process
//! loopback) owns the actual channel. The rest of the system sees it only
//! through [`ChannelHandle`], and observes it through a [`ChannelObserver`]
//! that the transport holds weakly.
//!
//! # Callback Contract
//!
//! - Callbacks arrive on transport threads and must not block.
//! - The transport holds observers as `Weak`s, so dropping an observer's
//!   owner ends delivery even if `unregister_observer` races with an event.
//! - A channel may have several observers (one per interested manager);
//!   each registration is identified by an [`ObserverId`].
//! - Implementations must not hold internal locks while invoking observer
//!   callbacks; callbacks may re-enter the handle (`state`, `send`,
//!   `unregister_observer`).

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};

use crate::Label;

/// Lifecycle state of a data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Channel is being negotiated
    Connecting,

    /// Channel can send and receive
    Open,

    /// Close has been requested but not completed
    Closing,

    /// Channel is gone; no further messages will arrive
    Closed,
}

impl ChannelState {
    /// Returns true if payloads may be sent on the channel.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true once the channel has fully closed.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns a short lowercase name for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives events for one channel.
pub trait ChannelObserver: Send + Sync {
    /// The channel state changed; read the new state from the handle.
    fn on_state_change(&self);

    /// A message arrived on the channel.
    fn on_message(&self, data: &[u8]);
}

/// Shared handle to one transport channel.
pub trait ChannelHandle: Send + Sync {
    /// Label the remote peer opened the channel with.
    fn label(&self) -> Label;

    /// Current channel state.
    fn state(&self) -> ChannelState;

    /// Transmits `data` as a single message frame.
    ///
    /// Callers are expected to check `state()` first; transports drop
    /// frames sent on a channel that is not open.
    fn send(&self, data: &[u8]);

    /// Subscribes `observer` to this channel's events.
    fn register_observer(&self, observer: Weak<dyn ChannelObserver>) -> ObserverId;

    /// Removes a subscription. A no-op if `id` is not registered.
    fn unregister_observer(&self, id: ObserverId);
}

/// Reference-counted channel handle shared between transport and handlers.
pub type SharedChannel = Arc<dyn ChannelHandle>;

/// Identifies one observer registration on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// Observer bookkeeping for transport implementations.
///
/// Notifications are delivered to a snapshot taken outside the lock, so
/// observers may register, unregister or drop themselves from inside a
/// callback. Registrations whose observer has been dropped are pruned on
/// the next notification.
#[derive(Default)]
pub struct ObserverRegistry {
    slots: Mutex<ObserverSlots>,
}

#[derive(Default)]
struct ObserverSlots {
    next_id: u64,
    observers: Vec<(ObserverId, Weak<dyn ChannelObserver>)>,
}

impl ObserverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` without keeping it alive.
    ///
    /// Ids are never reused within one registry.
    pub fn register(&self, observer: Weak<dyn ChannelObserver>) -> ObserverId {
        let mut slots = self.lock();
        let id = ObserverId(slots.next_id);
        slots.next_id += 1;
        slots.observers.push((id, observer));
        id
    }

    /// Removes a registration. Unknown ids are ignored.
    pub fn unregister(&self, id: ObserverId) {
        self.lock().observers.retain(|(existing, _)| *existing != id);
    }

    /// Number of registrations, including ones not yet pruned.
    pub fn len(&self) -> usize {
        self.lock().observers.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `on_state_change` on every live observer.
    pub fn notify_state_change(&self) {
        for observer in self.live() {
            observer.on_state_change();
        }
    }

    /// Hands `data` to every live observer, in registration order.
    pub fn notify_message(&self, data: &[u8]) {
        for observer in self.live() {
            observer.on_message(data);
        }
    }

    fn live(&self) -> Vec<Arc<dyn ChannelObserver>> {
        let mut slots = self.lock();
        let mut live = Vec::with_capacity(slots.observers.len());
        slots.observers.retain(|(_, weak)| match weak.upgrade() {
            Some(observer) => {
                live.push(observer);
                true
            }
            None => false,
        });
        live
    }

    fn lock(&self) -> MutexGuard<'_, ObserverSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_only_open_is_sendable() {
        assert!(ChannelState::Open.is_open());
        assert!(!ChannelState::Connecting.is_open());
        assert!(!ChannelState::Closing.is_open());
        assert!(!ChannelState::Closed.is_open());
    }

    #[test]
    fn test_closing_is_not_closed() {
        assert!(!ChannelState::Closing.is_closed());
        assert!(ChannelState::Closed.is_closed());
    }

    #[derive(Default)]
    struct Counter {
        states: AtomicUsize,
        bytes: AtomicUsize,
    }

    impl ChannelObserver for Counter {
        fn on_state_change(&self) {
            self.states.fetch_add(1, Ordering::SeqCst);
        }

        fn on_message(&self, data: &[u8]) {
            self.bytes.fetch_add(data.len(), Ordering::SeqCst);
        }
    }

    #[test]
    fn test_registry_notifies_all_observers() {
        let registry = ObserverRegistry::new();
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        let weak_a: Weak<dyn ChannelObserver> = Arc::downgrade(&a) as Weak<Counter>;
        let weak_b: Weak<dyn ChannelObserver> = Arc::downgrade(&b) as Weak<Counter>;
        registry.register(weak_a);
        registry.register(weak_b);

        registry.notify_message(b"90, 90");
        registry.notify_state_change();

        for counter in [&a, &b] {
            assert_eq!(counter.bytes.load(Ordering::SeqCst), 6);
            assert_eq!(counter.states.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_registry_unregister_is_idempotent() {
        let registry = ObserverRegistry::new();
        let a = Arc::new(Counter::default());
        let weak_a: Weak<dyn ChannelObserver> = Arc::downgrade(&a) as Weak<Counter>;
        let id = registry.register(weak_a);

        registry.unregister(id);
        registry.unregister(id);
        registry.notify_state_change();

        assert!(registry.is_empty());
        assert_eq!(a.states.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registry_prunes_dropped_observers() {
        let registry = ObserverRegistry::new();
        let a = Arc::new(Counter::default());
        let weak_a: Weak<dyn ChannelObserver> = Arc::downgrade(&a) as Weak<Counter>;
        registry.register(weak_a);
        drop(a);

        assert_eq!(registry.len(), 1);
        registry.notify_message(b"x");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(ChannelState::Open.to_string(), "open");
        assert_eq!(ChannelState::Closed.to_string(), "closed");
    }
}
