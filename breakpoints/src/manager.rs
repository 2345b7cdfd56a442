use std::sync::Arc;

use crate::{
    backend::{BackendBreakpoint, BackendId, DebugBackend, ListenerId},
    executor::Executor,
    internals::ManagerInternals,
    locator::SourceLocator,
    markers::ProblemMarkers,
    notifier::BreakpointNotifier,
    store::BreakpointStore,
    types::{BreakpointId, TargetInfo},
};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Only breakpoints of this debug model are synchronised.
    pub model_id: String,
    pub target: TargetInfo,
}

/// The services a manager synchronises between.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn BreakpointStore>,
    pub backend: Arc<dyn DebugBackend>,
    pub locator: Arc<dyn SourceLocator>,
    pub markers: Arc<dyn ProblemMarkers>,
    pub notifier: Arc<BreakpointNotifier>,
}

/// Keeps the breakpoints installed in one debug target in step with the
/// platform breakpoint store.
///
/// Dropping the manager disposes of it.
pub struct BreakpointManager {
    internals: Arc<ManagerInternals>,
    store_listener: ListenerId,
    backend_listener: ListenerId,
}

impl BreakpointManager {
    #[tracing::instrument(skip(collaborators), fields(target = %config.target.id))]
    pub fn new(config: ManagerConfig, collaborators: Collaborators) -> eyre::Result<Self> {
        let executor = Executor::new(format!("breakpoints-{}", config.target.id))?;
        let Collaborators {
            store,
            backend,
            locator,
            markers,
            notifier,
        } = collaborators;

        let internals = ManagerInternals::new(
            config.model_id,
            config.target,
            store,
            backend,
            locator,
            markers,
            notifier,
            executor,
        );

        let backend_listener = internals.backend.add_event_listener(internals.clone());
        let store_listener = internals.store.add_listener(internals.clone());
        tracing::debug!("breakpoint manager created");

        Ok(Self {
            internals,
            store_listener,
            backend_listener,
        })
    }

    pub fn target(&self) -> &TargetInfo {
        &self.internals.target
    }

    /// Marks the target live and installs the breakpoints that apply to it.
    #[tracing::instrument(skip(self), fields(target = %self.internals.target.id))]
    pub fn start_tracking(&self) {
        self.internals.start_tracking();
    }

    /// The backend has gone away: forget every breakpoint without deleting
    /// anything.
    #[tracing::instrument(skip(self), fields(target = %self.internals.target.id))]
    pub fn target_terminated(&self) {
        self.internals.clear();
    }

    /// Waits for every backend call queued so far to complete.
    pub fn flush(&self) {
        self.internals.executor.flush();
    }

    /// Detaches from the backend and the store, deletes every installed
    /// breakpoint, then clears all state. Further calls do nothing.
    #[tracing::instrument(skip(self), fields(target = %self.internals.target.id))]
    pub fn dispose(&self) {
        if !self.internals.mark_disposed() {
            return;
        }

        self.internals
            .backend
            .remove_event_listener(self.backend_listener);
        self.internals.store.remove_listener(self.store_listener);

        self.internals.submit_delete_all();
        self.internals.executor.shutdown();
        self.internals.clear();
        tracing::debug!("breakpoint manager disposed");
    }

    pub fn backend_breakpoint(&self, id: BreakpointId) -> Option<BackendBreakpoint> {
        self.internals.map().backend(id).cloned()
    }

    pub fn platform_breakpoint(&self, backend: BackendId) -> Option<BreakpointId> {
        self.internals.map().platform_id(backend)
    }

    pub fn is_registered(&self, id: BreakpointId) -> bool {
        self.internals.map().is_registered(id)
    }

    pub fn is_pending(&self, id: BreakpointId) -> bool {
        self.internals.map().is_pending(id)
    }

    /// Every platform breakpoint known to this target, installed or not.
    pub fn registered(&self) -> Vec<BreakpointId> {
        self.internals.map().platform_breakpoints()
    }
}

impl Drop for BreakpointManager {
    fn drop(&mut self) {
        self.dispose();
    }
}
