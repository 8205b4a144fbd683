//! Per-channel handler.
//!
//! A `ChannelHandler` observes one transport channel on behalf of the
//! manager that created it. It forwards every inbound payload to the
//! manager untouched and reports the channel's close exactly once.
//!
//! The transport only holds a `Weak` to the handler; the manager's
//! [`HandlerSet`](crate::HandlerSet) holds the one strong reference. When the
//! handler is dropped it unsubscribes from the channel.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use rdc_core::{ChannelObserver, ChannelState, Label, ObserverId, SharedChannel};
use tracing::{debug, trace};

use crate::ChannelManager;

/// Stable identity of a handler within its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Observer for one open channel.
pub struct ChannelHandler {
    id: HandlerId,
    manager: Weak<dyn ChannelManager>,
    channel: SharedChannel,
    subscription: ObserverId,
    closed: AtomicBool,
}

impl ChannelHandler {
    /// Creates a handler and subscribes it to `channel`.
    pub fn attach(
        id: HandlerId,
        manager: Weak<dyn ChannelManager>,
        channel: SharedChannel,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let observer: Weak<dyn ChannelObserver> = me.clone();
            let subscription = channel.register_observer(observer);
            Self {
                id,
                manager,
                channel,
                subscription,
                closed: AtomicBool::new(false),
            }
        })
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn label(&self) -> Label {
        self.channel.label()
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Sends `data` if the channel is open; otherwise drops it silently.
    pub fn send(&self, data: &[u8]) {
        if !self.channel.state().is_open() {
            trace!(handler = %self.id, bytes = data.len(), "Dropping send on non-open channel");
            return;
        }
        self.channel.send(data);
    }
}

impl ChannelObserver for ChannelHandler {
    fn on_state_change(&self) {
        let state = self.channel.state();
        debug!(handler = %self.id, %state, "Channel state changed");

        if state.is_closed() && !self.closed.swap(true, Ordering::AcqRel) {
            if let Some(manager) = self.manager.upgrade() {
                manager.on_closed(self.id);
            }
        }
    }

    fn on_message(&self, data: &[u8]) {
        if let Some(manager) = self.manager.upgrade() {
            manager.process(data);
        }
    }
}

impl Drop for ChannelHandler {
    fn drop(&mut self) {
        self.channel.unregister_observer(self.subscription);
    }
}

impl fmt::Debug for ChannelHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandler")
            .field("id", &self.id)
            .field("label", &self.channel.label())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
