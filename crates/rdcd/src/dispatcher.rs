//! Label-based dispatch of newly opened channels.
//!
//! The transport announces every new channel to one `Dispatcher`, which
//! forwards it to each manager registered under the channel's label, in
//! registration order.
//!
//! # Ownership
//!
//! The dispatcher only holds `Weak` references, so registering never keeps
//! a manager alive. References to dropped managers are pruned lazily during
//! the next dispatch for their label.
//!
//! # Locking
//!
//! The label map sits behind a single mutex. A dispatch holds it only long
//! enough to resolve and prune that label's references; managers are
//! invoked after it is released, so they may register further managers from
//! inside `on_new_channel`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rdc_core::{Label, SharedChannel};
use tracing::{debug, info, warn};

use crate::ChannelManager;

type Routes = HashMap<Label, Vec<Weak<dyn ChannelManager>>>;

/// Routes new channels to managers by label.
#[derive(Default)]
pub struct Dispatcher {
    routes: Mutex<Routes>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `manager` under `label`.
    ///
    /// The same manager may be registered more than once; it is then
    /// notified once per registration.
    pub fn register(&self, label: Label, manager: Weak<dyn ChannelManager>) {
        let mut routes = self.lock();
        let managers = routes.entry(label.clone()).or_default();
        managers.push(manager);
        info!(%label, registered = managers.len(), "Registered channel manager");
    }

    /// Registers `manager` under its own label.
    pub fn add<M: ChannelManager + 'static>(&self, manager: &Arc<M>) {
        let weak = Arc::downgrade(manager);
        let weak: Weak<dyn ChannelManager> = weak;
        self.register(manager.label().clone(), weak);
    }

    /// Announces a newly opened channel.
    ///
    /// Returns the number of managers that were notified.
    pub fn on_new_channel(&self, channel: SharedChannel) -> usize {
        let label = channel.label();
        let managers = self.resolve(&label);

        if managers.is_empty() {
            warn!(%label, "No channel manager registered for label");
            return 0;
        }

        for manager in &managers {
            manager.on_new_channel(Arc::clone(&channel));
        }

        debug!(%label, notified = managers.len(), "Dispatched new channel");
        managers.len()
    }

    /// Number of references registered under `label`, including ones whose
    /// manager is gone but has not been pruned yet.
    pub fn registered(&self, label: &Label) -> usize {
        self.lock().get(label).map_or(0, Vec::len)
    }

    /// Labels with at least one registration.
    pub fn labels(&self) -> Vec<Label> {
        let mut labels: Vec<Label> = self.lock().keys().cloned().collect();
        labels.sort();
        labels
    }

    /// Upgrades the live references for `label` and drops the dead ones.
    fn resolve(&self, label: &Label) -> Vec<Arc<dyn ChannelManager>> {
        let mut routes = self.lock();
        let Some(managers) = routes.get_mut(label) else {
            return Vec::new();
        };

        let before = managers.len();
        let mut live = Vec::with_capacity(before);
        managers.retain(|weak| match weak.upgrade() {
            Some(manager) => {
                live.push(manager);
                true
            }
            None => false,
        });

        let pruned = before - managers.len();
        if pruned > 0 {
            debug!(%label, pruned, "Pruned dropped channel managers");
        }
        if managers.is_empty() {
            routes.remove(label);
        }

        live
    }

    fn lock(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
