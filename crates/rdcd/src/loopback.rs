//! In-process channel transport.
//!
//! `LoopbackChannel` implements [`ChannelHandle`] without any I/O. The
//! caller drives state transitions and inbound messages directly, and
//! outbound frames are recorded for inspection. Useful for embedding the
//! managers in another process and for tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rdc_core::{ChannelHandle, ChannelObserver, ChannelState, Label, ObserverId, ObserverRegistry};
use tracing::trace;

pub struct LoopbackChannel {
    label: Label,
    state: Mutex<ChannelState>,
    observers: ObserverRegistry,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl LoopbackChannel {
    /// Creates a channel that is already open.
    pub fn open(label: impl Into<Label>) -> Arc<Self> {
        Self::with_state(label.into(), ChannelState::Open)
    }

    /// Creates a channel still negotiating; call [`set_state`](Self::set_state)
    /// to open it.
    pub fn connecting(label: impl Into<Label>) -> Arc<Self> {
        Self::with_state(label.into(), ChannelState::Connecting)
    }

    fn with_state(label: Label, state: ChannelState) -> Arc<Self> {
        Arc::new(Self {
            label,
            state: Mutex::new(state),
            observers: ObserverRegistry::new(),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Moves the channel to `state`, notifying observers if it changed.
    ///
    /// A closed channel stays closed.
    pub fn set_state(&self, state: ChannelState) {
        {
            let mut current = lock(&self.state);
            if *current == state || current.is_closed() {
                return;
            }
            *current = state;
        }
        trace!(label = %self.label, %state, "Loopback state changed");
        self.observers.notify_state_change();
    }

    pub fn close(&self) {
        self.set_state(ChannelState::Closed);
    }

    /// Delivers an inbound message to every observer. Ignored unless open.
    pub fn deliver(&self, data: &[u8]) {
        if !self.state().is_open() {
            trace!(label = %self.label, "Dropping delivery on non-open loopback");
            return;
        }
        self.observers.notify_message(data);
    }

    /// Frames sent on this channel so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.sent).clone()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

impl ChannelHandle for LoopbackChannel {
    fn label(&self) -> Label {
        self.label.clone()
    }

    fn state(&self) -> ChannelState {
        *lock(&self.state)
    }

    fn send(&self, data: &[u8]) {
        if self.state().is_open() {
            lock(&self.sent).push(data.to_vec());
        }
    }

    fn register_observer(&self, observer: Weak<dyn ChannelObserver>) -> ObserverId {
        self.observers.register(observer)
    }

    fn unregister_observer(&self, id: ObserverId) {
        self.observers.unregister(id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
