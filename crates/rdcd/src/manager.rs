//! The channel manager capability and the handler set managers own.
//!
//! # Locking
//!
//! `HandlerSet` guards its map with one mutex held for each insert, remove
//! and drain. Handlers are never called back while the lock is held, so a
//! close notification arriving on a transport thread can always make
//! progress, and manager teardown can drain the set without racing it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rdc_core::{ChannelObserver, Label, SharedChannel};

use crate::{ChannelHandler, HandlerId};

/// Something that wants the channels opened under one label.
///
/// Managers are shared as `Arc`s by the application and registered with
/// the [`Dispatcher`](crate::Dispatcher) as `Weak`s. Every method may be
/// called from transport threads and must return without blocking.
pub trait ChannelManager: Send + Sync {
    /// Label this manager registers under. Stable for its lifetime.
    fn label(&self) -> &Label;

    /// A channel with this manager's label opened. Implementations wrap it
    /// in a [`ChannelHandler`] they own.
    fn on_new_channel(&self, channel: SharedChannel);

    /// A handler this manager owns saw its channel close. Calling this for a
    /// handler that is no longer owned is a no-op.
    fn on_closed(&self, handler: HandlerId);

    /// A message arrived on one of this manager's channels.
    fn process(&self, data: &[u8]);
}

/// Owning collection of live handlers, keyed by handler id.
#[derive(Default)]
pub struct HandlerSet {
    slots: Mutex<HandlerSlots>,
}

#[derive(Default)]
struct HandlerSlots {
    next_id: u64,
    handlers: HashMap<HandlerId, Arc<ChannelHandler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps `channel` in a new handler owned by this set.
    ///
    /// `manager` is the handler's back-reference for messages and close
    /// notifications. If the channel closed before the handler subscribed,
    /// the handler reports it immediately and is removed again before this
    /// returns.
    pub fn attach(&self, manager: Weak<dyn ChannelManager>, channel: SharedChannel) -> HandlerId {
        let handler = {
            let mut slots = self.lock();
            let id = HandlerId::new(slots.next_id);
            slots.next_id += 1;

            let handler = ChannelHandler::attach(id, manager, channel);
            slots.handlers.insert(id, Arc::clone(&handler));
            handler
        };

        // A close that happened before subscription was never delivered
        handler.on_state_change();
        handler.id()
    }

    /// Removes a handler, returning whether it was present.
    ///
    /// The handler is dropped (and unsubscribed) after the lock is released.
    pub fn remove(&self, id: HandlerId) -> bool {
        let removed = self.lock().handlers.remove(&id);
        removed.is_some()
    }

    /// Removes and drops every handler, returning how many there were.
    pub fn drain(&self) -> usize {
        let drained: Vec<Arc<ChannelHandler>> =
            self.lock().handlers.drain().map(|(_, handler)| handler).collect();
        drained.len()
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        self.lock().handlers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of the live handlers, in creation order.
    pub fn ids(&self) -> Vec<HandlerId> {
        let mut ids: Vec<HandlerId> = self.lock().handlers.keys().copied().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> MutexGuard<'_, HandlerSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackChannel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Minimal manager built on `HandlerSet`.
    struct SetManager {
        label: Label,
        handlers: HandlerSet,
        removals: AtomicUsize,
        self_ref: Weak<SetManager>,
    }

    impl SetManager {
        fn new() -> Arc<Self> {
            Arc::new_cyclic(|self_ref| Self {
                label: Label::new("servo"),
                handlers: HandlerSet::new(),
                removals: AtomicUsize::new(0),
                self_ref: self_ref.clone(),
            })
        }
    }

    impl ChannelManager for SetManager {
        fn label(&self) -> &Label {
            &self.label
        }

        fn on_new_channel(&self, channel: SharedChannel) {
            let manager: Weak<dyn ChannelManager> = self.self_ref.clone();
            self.handlers.attach(manager, channel);
        }

        fn on_closed(&self, handler: HandlerId) {
            if self.handlers.remove(handler) {
                self.removals.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn process(&self, _data: &[u8]) {}
    }

    #[test]
    fn test_handler_lives_until_channel_closes() {
        let manager = SetManager::new();
        let channel = LoopbackChannel::open("servo");

        manager.on_new_channel(channel.clone());
        assert_eq!(manager.handlers.len(), 1);
        assert_eq!(channel.observer_count(), 1);

        channel.close();
        assert!(manager.handlers.is_empty());
        assert_eq!(channel.observer_count(), 0);
    }

    #[test]
    fn test_double_close_removes_once() {
        let manager = SetManager::new();
        let channel = LoopbackChannel::open("servo");
        manager.on_new_channel(channel.clone());
        let id = manager.handlers.ids()[0];

        manager.on_closed(id);
        manager.on_closed(id);

        assert_eq!(manager.removals.load(Ordering::SeqCst), 1);
        assert!(!manager.handlers.contains(id));
    }

    #[test]
    fn test_already_closed_channel_is_not_kept() {
        let manager = SetManager::new();
        let channel = LoopbackChannel::open("servo");
        channel.close();

        manager.on_new_channel(channel.clone());

        assert!(manager.handlers.is_empty());
        assert_eq!(manager.removals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let manager = SetManager::new();
        for _ in 0..3 {
            manager.on_new_channel(LoopbackChannel::open("servo"));
        }

        let ids = manager.handlers.ids();
        assert_eq!(ids, vec![HandlerId::new(0), HandlerId::new(1), HandlerId::new(2)]);
    }

    #[test]
    fn test_drain_unsubscribes_everything() {
        let manager = SetManager::new();
        let channels: Vec<_> = (0..4).map(|_| LoopbackChannel::open("servo")).collect();
        for channel in &channels {
            manager.on_new_channel(channel.clone());
        }

        assert_eq!(manager.handlers.drain(), 4);
        assert!(manager.handlers.is_empty());
        assert!(channels.iter().all(|c| c.observer_count() == 0));

        // Closing after the drain finds nothing to remove
        channels[0].close();
        assert_eq!(manager.removals.load(Ordering::SeqCst), 0);
    }
}
