//! Installer and reconciler for one target.
//!
//! Store notifications are turned into decisions on the notifying thread and
//! the backend calls they require are queued on the target's executor. Backend
//! events are reconciled on whatever thread the backend delivers them. The map
//! lock is never held across a call into the store, the backend, the problem
//! markers or the notifier, as each of those may call straight back in.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, Weak,
};

use crate::{
    backend::{
        BackendBreakpoint, BackendError, BackendEvent, BackendEventListener, BackendId,
        CreateRequest, DebugBackend, TargetEvent,
    },
    executor::Executor,
    filter,
    locator::SourceLocator,
    map::{BindOutcome, Binding, BreakpointMap},
    markers::{Problem, ProblemKind, ProblemMarkers},
    notifier::{AttributeDelta, BreakpointNotifier, Event},
    store::{BreakpointListener, BreakpointStore},
    types::{BreakpointId, PlatformBreakpoint, TargetInfo},
};

pub(crate) struct ManagerInternals {
    this: Weak<ManagerInternals>,
    pub(crate) model_id: String,
    pub(crate) target: TargetInfo,
    pub(crate) store: Arc<dyn BreakpointStore>,
    pub(crate) backend: Arc<dyn DebugBackend>,
    locator: Arc<dyn SourceLocator>,
    markers: Arc<dyn ProblemMarkers>,
    notifier: Arc<BreakpointNotifier>,
    map: Mutex<BreakpointMap>,
    pub(crate) executor: Executor,
    live: AtomicBool,
    disposed: AtomicBool,
}

impl ManagerInternals {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        model_id: String,
        target: TargetInfo,
        store: Arc<dyn BreakpointStore>,
        backend: Arc<dyn DebugBackend>,
        locator: Arc<dyn SourceLocator>,
        markers: Arc<dyn ProblemMarkers>,
        notifier: Arc<BreakpointNotifier>,
        executor: Executor,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            model_id,
            target,
            store,
            backend,
            locator,
            markers,
            notifier,
            map: Mutex::new(BreakpointMap::new()),
            executor,
            live: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    pub(crate) fn map(&self) -> MutexGuard<'_, BreakpointMap> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, job: impl FnOnce(&ManagerInternals) + Send + 'static) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        self.executor.submit(Box::new(move || job(&this)));
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Returns `false` if already disposed.
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    fn can_install(&self) -> bool {
        self.live.load(Ordering::SeqCst)
            && !self.is_disposed()
            && self.backend.capabilities().breakpoints
    }

    fn is_ours(&self, breakpoint: &PlatformBreakpoint) -> bool {
        breakpoint.model_id == self.model_id
    }

    fn applies(&self, breakpoint: &PlatformBreakpoint) -> bool {
        filter::applies_to_target(breakpoint, &self.target, self.locator.as_ref())
    }

    fn effective_enabled(&self, breakpoint: &PlatformBreakpoint) -> bool {
        breakpoint.enabled && self.store.is_enabled()
    }

    // lifecycle

    pub(crate) fn start_tracking(&self) {
        self.live.store(true, Ordering::SeqCst);
        self.submit(|this| this.install_missing());
    }

    /// Deletes every bound backend breakpoint; queued after the listeners
    /// have been detached.
    pub(crate) fn submit_delete_all(&self) {
        self.submit(|this| {
            let handles: Vec<BackendId> = this.map().bound().map(|(_, b)| b.id).collect();
            if handles.is_empty() {
                return;
            }
            tracing::debug!(count = handles.len(), "deleting all breakpoints");
            if let Err(error) = this.backend.delete_breakpoints(&handles) {
                tracing::warn!(%error, "deleting breakpoints on dispose");
            }
        });
    }

    /// Forgets every breakpoint without touching the backend.
    pub(crate) fn clear(&self) {
        self.live.store(false, Ordering::SeqCst);
        let cleared = self.map().clear();
        self.release(cleared);
    }

    /// Drops this target's runtime state from breakpoints that have left the map.
    fn release(&self, cleared: Vec<(BreakpointId, Binding)>) {
        let mut removed = Vec::new();
        for (id, binding) in cleared {
            if let Binding::Bound(_) = binding {
                self.store.remove_installed_target(id, &self.target.id);
                removed.push(id);
            }
            self.markers.clear_all(id);
        }

        if !removed.is_empty() {
            self.notifier.publish(Event::Removed {
                target: self.target.id.clone(),
                breakpoints: removed,
            });
        }
    }

    // installer jobs, run on the executor

    fn pending_breakpoint(&self, id: BreakpointId) -> Option<PlatformBreakpoint> {
        let map = self.map();
        if map.is_pending(id) {
            map.breakpoint(id).cloned()
        } else {
            None
        }
    }

    #[tracing::instrument(skip(self), fields(target = %self.target.id))]
    fn install(&self, id: BreakpointId) {
        if !self.can_install() {
            return;
        }
        // removed or installed since the job was queued
        let Some(breakpoint) = self.pending_breakpoint(id) else {
            return;
        };

        let capabilities = self.backend.capabilities();
        if breakpoint.is_tracepoint() && !capabilities.tracepoints {
            self.markers.report(Problem::unsupported_tracepoint(id));
            return;
        }

        let location = match filter::backend_location(&breakpoint, self.locator.as_ref()) {
            Ok(location) => location,
            Err(error) => {
                self.markers.report(Problem::unresolved(id, error.to_string()));
                return;
            }
        };
        let request = CreateRequest {
            location,
            condition: filter::backend_condition(&breakpoint, &self.target),
            enabled: self.effective_enabled(&breakpoint),
            hardware: breakpoint.hardware,
            tracepoint: breakpoint.is_tracepoint(),
            pass_count: breakpoint.pass_count(),
        };

        tracing::debug!(?request, "installing breakpoint");
        self.map().mark_installing(id);
        let result = self.backend.create_breakpoint(&request);
        self.map().finish_installing(id);
        let mut created = match result {
            Ok(created) => created,
            Err(BackendError::Unresolved(reason)) => {
                tracing::debug!(%reason, "breakpoint unresolved");
                self.markers.report(Problem::unresolved(id, reason));
                return;
            }
            Err(error) => {
                tracing::warn!(%error, "backend rejected breakpoint");
                return;
            }
        };

        if !capabilities.enable_on_create && created.enabled != request.enabled {
            match self.backend.set_enabled(created.id, request.enabled) {
                Ok(()) => created.enabled = request.enabled,
                Err(error) => tracing::warn!(backend = %created.id, %error, "setting enabled state"),
            }
        }

        self.bind_installed(id, created);
    }

    fn bind_installed(&self, id: BreakpointId, created: BackendBreakpoint) {
        // recorded as installed before the binding is visible
        self.store.add_installed_target(id, &self.target.id);
        let outcome = self.map().bind(id, created.clone());

        match outcome {
            BindOutcome::Bound => self.on_bound(id),
            BindOutcome::AlreadyBound => {
                self.map().update_backend(created);
            }
            BindOutcome::NotRegistered => {
                tracing::debug!(breakpoint = id, backend = %created.id, "breakpoint removed during install");
                self.store.remove_installed_target(id, &self.target.id);
                self.delete_unowned(created.id);
            }
            BindOutcome::BoundElsewhere(existing) => {
                tracing::warn!(breakpoint = id, backend = %created.id, %existing, "breakpoint already installed");
                self.delete_unowned(created.id);
            }
            BindOutcome::BackendTaken(owner) => {
                tracing::warn!(breakpoint = id, backend = %created.id, owner, "backend breakpoint claimed by another breakpoint");
                self.store.remove_installed_target(id, &self.target.id);
            }
        }
    }

    fn delete_unowned(&self, backend: BackendId) {
        if let Err(error) = self.backend.delete_breakpoints(&[backend]) {
            tracing::warn!(%backend, %error, "deleting unowned backend breakpoint");
        }
    }

    fn on_bound(&self, id: BreakpointId) {
        tracing::debug!(breakpoint = id, target = %self.target.id, "breakpoint installed");
        self.markers.clear(id, &ProblemKind::Unresolved);
        self.notifier.publish(Event::Installed {
            target: self.target.id.clone(),
            breakpoint: id,
        });
    }

    /// Forgets a backend breakpoint that no longer exists. Safe to call more
    /// than once for the same handle.
    fn forget_backend(&self, backend: BackendId) {
        let Some(id) = self.map().unbind(backend) else {
            return;
        };
        tracing::debug!(breakpoint = id, %backend, "breakpoint uninstalled");
        self.store.remove_installed_target(id, &self.target.id);
        self.markers.clear_all(id);
        self.notifier.publish(Event::Removed {
            target: self.target.id.clone(),
            breakpoints: vec![id],
        });
    }

    #[tracing::instrument(skip(self), fields(target = %self.target.id))]
    fn uninstall(&self, id: BreakpointId) {
        let handle = {
            let mut map = self.map();
            if !map.is_registered(id) {
                return;
            }
            match map.backend(id) {
                Some(backend) => backend.id,
                None => {
                    map.deregister(id);
                    return;
                }
            }
        };

        match self.backend.delete_breakpoints(&[handle]) {
            Ok(()) => self.forget_backend(handle),
            // the binding stays until the backend says otherwise
            Err(error) => tracing::warn!(backend = %handle, %error, "deleting breakpoint"),
        }
    }

    /// Removes and installs again, as one job so nothing can interleave.
    #[tracing::instrument(skip(self), fields(target = %self.target.id))]
    fn reinstall(&self, id: BreakpointId) {
        let previous = self.map().backend(id).map(|backend| backend.id);
        if let Some(handle) = previous {
            if let Err(error) = self.backend.delete_breakpoints(&[handle]) {
                tracing::warn!(backend = %handle, %error, "deleting breakpoint for reinstall");
                return;
            }
            self.forget_backend(handle);
        }

        let Some(breakpoint) = self.store.get(id) else {
            return;
        };
        if !self.applies(&breakpoint) {
            return;
        }
        self.map().register(breakpoint);
        self.install(id);
    }

    /// Brings the backend breakpoint in line with the recorded platform
    /// breakpoint, or installs it if still pending.
    fn synchronize(&self, id: BreakpointId) {
        let state = {
            let map = self.map();
            match (map.breakpoint(id), map.backend(id)) {
                (Some(breakpoint), Some(backend)) => Some((breakpoint.clone(), backend.id)),
                (Some(_), None) => None,
                (None, _) => return,
            }
        };

        match state {
            None => self.install(id),
            Some((breakpoint, handle)) => {
                self.push_enabled(handle, self.effective_enabled(&breakpoint));
                self.push_condition(handle, filter::backend_condition(&breakpoint, &self.target));
            }
        }
    }

    fn push_enabled(&self, handle: BackendId, enabled: bool) {
        match self.map().bound_backend(handle) {
            Some(backend) if backend.enabled != enabled => {}
            _ => return,
        }

        tracing::debug!(backend = %handle, enabled, "pushing enabled state");
        match self.backend.set_enabled(handle, enabled) {
            Ok(()) => {
                let mut map = self.map();
                if let Some(mut backend) = map.bound_backend(handle).cloned() {
                    backend.enabled = enabled;
                    map.update_backend(backend);
                }
            }
            Err(error) => tracing::warn!(backend = %handle, %error, "setting enabled state"),
        }
    }

    fn push_condition(&self, handle: BackendId, condition: crate::backend::Condition) {
        let unchanged = match self.map().bound_backend(handle) {
            Some(backend) => backend.condition == condition,
            None => return,
        };
        if unchanged {
            return;
        }

        tracing::debug!(backend = %handle, ?condition, "pushing condition");
        match self.backend.set_condition(handle, &condition) {
            Ok(()) => {
                let mut map = self.map();
                if let Some(mut backend) = map.bound_backend(handle).cloned() {
                    backend.condition = condition;
                    map.update_backend(backend);
                }
            }
            Err(error) => tracing::warn!(backend = %handle, %error, "setting condition"),
        }
    }

    /// Installs every applicable breakpoint without a backend breakpoint.
    fn install_missing(&self) {
        if !self.can_install() {
            return;
        }
        for breakpoint in self.store.breakpoints(&self.model_id) {
            if !self.applies(&breakpoint) {
                continue;
            }
            let id = breakpoint.id;
            let missing = {
                let mut map = self.map();
                map.register(breakpoint) || map.is_pending(id)
            };
            if missing {
                self.install(id);
            }
        }
    }

    // reconciler

    fn on_created(&self, backend: &BackendBreakpoint) {
        let matched = self.map().lookup_platform(backend, |breakpoint, backend| {
            filter::structural_match(breakpoint, backend, self.locator.as_ref())
        });

        let id = match matched {
            Some(id) => {
                self.store.add_installed_target(id, &self.target.id);
                let outcome = self.map().bind(id, backend.clone());
                match outcome {
                    BindOutcome::Bound => self.on_bound(id),
                    BindOutcome::AlreadyBound => {}
                    other => {
                        if matches!(
                            other,
                            BindOutcome::NotRegistered | BindOutcome::BackendTaken(_)
                        ) {
                            self.store.remove_installed_target(id, &self.target.id);
                        }
                        tracing::debug!(breakpoint = id, backend = %backend.id, ?other, "created breakpoint not bound");
                        return;
                    }
                }
                id
            }
            None if backend.temporary => {
                tracing::trace!(backend = %backend.id, "ignoring temporary breakpoint");
                return;
            }
            None => match self.mirror(backend) {
                Some(id) => id,
                None => return,
            },
        };

        let stashed = self.map().take_stashed(backend.id);
        if let Some(change) = stashed {
            self.forward_change(id, &change);
        }

        // the global toggle wins over whatever the backend created
        let enabled = self.map().breakpoint(id).map(|breakpoint| breakpoint.enabled);
        if let Some(enabled) = enabled {
            let desired = enabled && self.store.is_enabled();
            if desired != backend.enabled {
                let handle = backend.id;
                self.submit(move |this| this.push_enabled(handle, desired));
            }
        }
    }

    /// Creates a platform breakpoint for one the backend created on its own.
    fn mirror(&self, backend: &BackendBreakpoint) -> Option<BreakpointId> {
        let id = self.store.next_id();
        let mut breakpoint =
            PlatformBreakpoint::from_backend(id, self.model_id.clone(), backend, &self.target);
        // only this target knows about it
        breakpoint.filters.targets.insert(self.target.id.clone());
        breakpoint.installed_on.insert(self.target.id.clone());

        // registered first, so the store's added notification finds it known
        let outcome = self.map().register_bound(breakpoint.clone(), backend.clone());
        if outcome != BindOutcome::Bound {
            tracing::warn!(breakpoint = id, backend = %backend.id, ?outcome, "could not record backend breakpoint");
            return None;
        }

        if let Err(error) = self.store.add(breakpoint) {
            tracing::warn!(backend = %backend.id, ?error, "adding breakpoint created by the backend");
            self.map().unbind(backend.id);
            return None;
        }

        tracing::debug!(breakpoint = id, backend = %backend.id, "mirrored backend breakpoint");
        self.on_bound(id);
        Some(id)
    }

    fn forward_change(&self, id: BreakpointId, backend: &BackendBreakpoint) {
        self.notifier.publish(Event::Changed {
            target: self.target.id.clone(),
            breakpoint: id,
            delta: AttributeDelta {
                enabled: Some(backend.enabled),
                ignore_count: Some(backend.condition.ignore_count),
                condition: Some(backend.condition.expression.clone()),
            },
        });
    }

    fn on_changed(&self, backend: &BackendBreakpoint) {
        let id = {
            let mut map = self.map();
            let id = map.platform_id(backend.id);
            if id.is_none() {
                map.stash(backend.clone());
            }
            id
        };

        match id {
            Some(id) => self.forward_change(id, backend),
            None => tracing::debug!(backend = %backend.id, "deferring change to unknown breakpoint"),
        }
    }

    fn on_moved(&self, handle: BackendId, line: u32) {
        // the recorded breakpoint moves first so the store change is not a reinstall
        let relocated = self.map().relocate(handle, line);
        let Some((id, previous)) = relocated else {
            tracing::debug!(backend = %handle, line, "move of unknown breakpoint");
            return;
        };

        if let Some(mut breakpoint) = self.store.get(id) {
            breakpoint.set_line_number(line);
            if let Err(error) = self.store.update(breakpoint) {
                tracing::warn!(breakpoint = id, ?error, "updating moved breakpoint");
            }
        }
        self.markers.report(Problem::moved(id, previous, line));
    }

    fn on_problem(
        &self,
        handle: BackendId,
        description: &str,
        severity: crate::markers::Severity,
        kind: &str,
    ) {
        let Some(id) = self.map().platform_id(handle) else {
            tracing::debug!(backend = %handle, description, "problem for unknown breakpoint");
            return;
        };
        self.markers.report(Problem {
            breakpoint: id,
            kind: ProblemKind::Backend(kind.to_string()),
            description: description.to_string(),
            severity,
        });
    }
}

impl BreakpointListener for ManagerInternals {
    #[tracing::instrument(skip_all, fields(breakpoint = breakpoint.id, target = %self.target.id))]
    fn breakpoint_added(&self, breakpoint: &PlatformBreakpoint) {
        if !self.is_ours(breakpoint) || !self.can_install() || !self.applies(breakpoint) {
            return;
        }
        if !self.map().register(breakpoint.clone()) {
            return;
        }
        let id = breakpoint.id;
        self.submit(move |this| this.install(id));
    }

    #[tracing::instrument(skip_all, fields(breakpoint = breakpoint.id, target = %self.target.id))]
    fn breakpoint_removed(&self, breakpoint: &PlatformBreakpoint) {
        if !self.is_ours(breakpoint) || self.is_disposed() {
            return;
        }
        let id = breakpoint.id;
        if !self.map().is_registered(id) {
            return;
        }
        self.markers.clear_all(id);
        self.submit(move |this| this.uninstall(id));
    }

    #[tracing::instrument(skip_all, fields(breakpoint = breakpoint.id, target = %self.target.id))]
    fn breakpoint_changed(&self, breakpoint: &PlatformBreakpoint) {
        if !self.is_ours(breakpoint) || !self.can_install() {
            return;
        }

        let id = breakpoint.id;
        let applies = self.applies(breakpoint);
        let reinstall = {
            let mut map = self.map();
            match (map.is_registered(id), applies) {
                (false, false) => return,
                (false, true) | (true, false) => None,
                (true, true) => {
                    let bound = map.backend(id).is_some();
                    let reinstall = map
                        .breakpoint(id)
                        .map(|previous| bound && filter::needs_reinstall(previous, breakpoint))
                        .unwrap_or(false);
                    map.update_breakpoint(breakpoint.clone());
                    Some(reinstall)
                }
            }
        };

        match reinstall {
            None if applies => self.breakpoint_added(breakpoint),
            None => self.breakpoint_removed(breakpoint),
            Some(true) => self.submit(move |this| this.reinstall(id)),
            Some(false) => self.submit(move |this| this.synchronize(id)),
        }
    }

    #[tracing::instrument(skip(self), fields(target = %self.target.id))]
    fn breakpoint_manager_enablement_changed(&self, enabled: bool) {
        if !self.can_install() {
            return;
        }
        // a disabled breakpoint stays disabled whatever the global state
        let handles: Vec<BackendId> = self
            .map()
            .bound()
            .filter(|(breakpoint, _)| breakpoint.enabled)
            .map(|(_, backend)| backend.id)
            .collect();

        for handle in handles {
            self.submit(move |this| this.push_enabled(handle, enabled));
        }
    }
}

impl BackendEventListener for ManagerInternals {
    fn handle_event(&self, event: &TargetEvent) {
        if event.target != self.target.id
            || self.is_disposed()
            || !self.live.load(Ordering::SeqCst)
        {
            return;
        }

        tracing::debug!(event = ?event.event, target = %self.target.id, "handling backend event");
        match &event.event {
            BackendEvent::Created(backend) => self.on_created(backend),
            BackendEvent::Destroyed(handle) => self.forget_backend(*handle),
            BackendEvent::Changed(backend) => self.on_changed(backend),
            BackendEvent::Moved { breakpoint, line } => self.on_moved(*breakpoint, *line),
            BackendEvent::Problem {
                breakpoint,
                description,
                severity,
                kind,
            } => self.on_problem(*breakpoint, description, *severity, kind),
            BackendEvent::ExecutableReloaded => self.submit(|this| this.install_missing()),
        }
    }
}
