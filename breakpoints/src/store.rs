//! The persisted platform breakpoint store, and listeners for its changes.
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use eyre::WrapErr;

use crate::{
    backend::ListenerId,
    types::{BreakpointId, PlatformBreakpoint, TargetId},
};

/// Callbacks are made on the thread that changed the store, after the change
/// is visible through the store.
pub trait BreakpointListener: Send + Sync {
    fn breakpoint_added(&self, breakpoint: &PlatformBreakpoint);

    fn breakpoint_removed(&self, breakpoint: &PlatformBreakpoint);

    fn breakpoint_changed(&self, breakpoint: &PlatformBreakpoint);

    fn breakpoint_manager_enablement_changed(&self, enabled: bool);
}

pub trait BreakpointStore: Send + Sync {
    fn next_id(&self) -> BreakpointId;

    fn breakpoints(&self, model_id: &str) -> Vec<PlatformBreakpoint>;

    fn get(&self, id: BreakpointId) -> Option<PlatformBreakpoint>;

    /// Adds a breakpoint, allocating an id when it has none (`0`).
    fn add(&self, breakpoint: PlatformBreakpoint) -> eyre::Result<BreakpointId>;

    fn remove(&self, id: BreakpointId) -> eyre::Result<PlatformBreakpoint>;

    /// Replaces a breakpoint's user attributes. The targets it is installed on
    /// are kept from the stored breakpoint.
    fn update(&self, breakpoint: PlatformBreakpoint) -> eyre::Result<()>;

    // Runtime bookkeeping, which does not notify listeners. Both are idempotent
    // per target, so the install count is the number of targets.
    fn add_installed_target(&self, id: BreakpointId, target: &TargetId);

    fn remove_installed_target(&self, id: BreakpointId, target: &TargetId);

    /// The global "skip all breakpoints" toggle, inverted.
    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    fn add_listener(&self, listener: Arc<dyn BreakpointListener>) -> ListenerId;

    fn remove_listener(&self, listener: ListenerId);
}

struct StoreState {
    breakpoints: BTreeMap<BreakpointId, PlatformBreakpoint>,
    enabled: bool,
    next_id: BreakpointId,
}

#[derive(Default)]
struct Listeners {
    next_id: ListenerId,
    registered: Vec<(ListenerId, Arc<dyn BreakpointListener>)>,
}

pub struct InMemoryStore {
    state: Mutex<StoreState>,
    listeners: Mutex<Listeners>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::from_breakpoints(Vec::new(), true)
    }

    pub fn from_breakpoints(
        breakpoints: impl IntoIterator<Item = PlatformBreakpoint>,
        enabled: bool,
    ) -> Self {
        let breakpoints: BTreeMap<_, _> = breakpoints
            .into_iter()
            .map(|breakpoint| (breakpoint.id, breakpoint))
            .collect();
        let next_id = breakpoints.keys().max().copied().unwrap_or(0);

        Self {
            state: Mutex::new(StoreState {
                breakpoints,
                enabled,
                next_id,
            }),
            listeners: Mutex::new(Listeners::default()),
        }
    }

    /// Ids are never handed out again, including those of deleted breakpoints.
    pub fn with_next_id(self, last_id: BreakpointId) -> Self {
        {
            let mut state = self.state();
            state.next_id = state.next_id.max(last_id);
        }
        self
    }

    /// The most recently allocated id.
    pub fn last_id(&self) -> BreakpointId {
        self.state().next_id
    }

    /// Every breakpoint, whatever its model.
    pub fn snapshot(&self) -> Vec<PlatformBreakpoint> {
        self.state().breakpoints.values().cloned().collect()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_breakpoint(&self, id: BreakpointId, f: impl FnOnce(&mut PlatformBreakpoint)) {
        match self.state().breakpoints.get_mut(&id) {
            Some(breakpoint) => f(breakpoint),
            None => tracing::trace!(breakpoint = id, "breakpoint no longer in store"),
        }
    }

    // listeners are called without any store lock held, so they may call back in
    fn notify(&self, f: impl Fn(&dyn BreakpointListener)) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .registered
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            f(listener.as_ref());
        }
    }
}

impl BreakpointStore for InMemoryStore {
    fn next_id(&self) -> BreakpointId {
        let mut state = self.state();
        state.next_id += 1;
        state.next_id
    }

    fn breakpoints(&self, model_id: &str) -> Vec<PlatformBreakpoint> {
        self.state()
            .breakpoints
            .values()
            .filter(|breakpoint| breakpoint.model_id == model_id)
            .cloned()
            .collect()
    }

    fn get(&self, id: BreakpointId) -> Option<PlatformBreakpoint> {
        self.state().breakpoints.get(&id).cloned()
    }

    #[tracing::instrument(skip_all, fields(breakpoint = breakpoint.id))]
    fn add(&self, mut breakpoint: PlatformBreakpoint) -> eyre::Result<BreakpointId> {
        {
            let mut state = self.state();
            if breakpoint.id == 0 {
                state.next_id += 1;
                breakpoint.id = state.next_id;
            } else {
                eyre::ensure!(
                    !state.breakpoints.contains_key(&breakpoint.id),
                    "breakpoint {} already exists",
                    breakpoint.id
                );
                state.next_id = state.next_id.max(breakpoint.id);
            }
            state.breakpoints.insert(breakpoint.id, breakpoint.clone());
        }

        tracing::debug!(breakpoint = breakpoint.id, "breakpoint added");
        self.notify(|listener| listener.breakpoint_added(&breakpoint));
        Ok(breakpoint.id)
    }

    fn remove(&self, id: BreakpointId) -> eyre::Result<PlatformBreakpoint> {
        let removed = self
            .state()
            .breakpoints
            .remove(&id)
            .ok_or_else(|| eyre::eyre!("no breakpoint with id {id}"))?;

        tracing::debug!(breakpoint = id, "breakpoint removed");
        self.notify(|listener| listener.breakpoint_removed(&removed));
        Ok(removed)
    }

    fn update(&self, mut breakpoint: PlatformBreakpoint) -> eyre::Result<()> {
        {
            let mut state = self.state();
            let stored = state
                .breakpoints
                .get_mut(&breakpoint.id)
                .ok_or_else(|| eyre::eyre!("no breakpoint with id {}", breakpoint.id))
                .wrap_err("updating breakpoint")?;
            breakpoint.installed_on = stored.installed_on.clone();
            *stored = breakpoint.clone();
        }

        tracing::debug!(breakpoint = breakpoint.id, "breakpoint changed");
        self.notify(|listener| listener.breakpoint_changed(&breakpoint));
        Ok(())
    }

    fn add_installed_target(&self, id: BreakpointId, target: &TargetId) {
        self.with_breakpoint(id, |breakpoint| {
            breakpoint.installed_on.insert(target.clone());
        });
    }

    fn remove_installed_target(&self, id: BreakpointId, target: &TargetId) {
        self.with_breakpoint(id, |breakpoint| {
            breakpoint.installed_on.remove(target);
        });
    }

    fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    fn set_enabled(&self, enabled: bool) {
        {
            let mut state = self.state();
            if state.enabled == enabled {
                return;
            }
            state.enabled = enabled;
        }
        self.notify(|listener| listener.breakpoint_manager_enablement_changed(enabled));
    }

    fn add_listener(&self, listener: Arc<dyn BreakpointListener>) -> ListenerId {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.registered.push((id, listener));
        id
    }

    fn remove_listener(&self, listener: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .registered
            .retain(|(id, _)| *id != listener);
    }
}
