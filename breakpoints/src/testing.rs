//! Testing utilities for code driving a breakpoint manager.
//!
//! [`MockBackend`] stands in for a debug backend: it records every call made
//! to it, keeps the breakpoints it has created, and announces their creation
//! and destruction to its listeners the way a live debugger would.
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    backend::{
        BackendBreakpoint, BackendError, BackendEvent, BackendEventListener, BackendId,
        BackendLocation, Capabilities, Condition, CreateRequest, DebugBackend, ListenerId,
        TargetEvent,
    },
    types::TargetId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Create(CreateRequest),
    Delete(Vec<BackendId>),
    SetEnabled(BackendId, bool),
    SetCondition(BackendId, Condition),
}

struct MockState {
    capabilities: Capabilities,
    calls: Vec<BackendCall>,
    installed: BTreeMap<BackendId, BackendBreakpoint>,
    next_id: u64,
    fail_next: Option<BackendError>,
    emit_lifecycle: bool,
}

pub struct MockBackend {
    target: TargetId,
    state: Mutex<MockState>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn BackendEventListener>)>>,
    next_listener: Mutex<ListenerId>,
}

impl MockBackend {
    pub fn new(target: TargetId) -> Self {
        Self {
            target,
            state: Mutex::new(MockState {
                capabilities: Capabilities::default(),
                calls: Vec::new(),
                installed: BTreeMap::new(),
                next_id: 100,
                fail_next: None,
                emit_lifecycle: true,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: Mutex::new(0),
        }
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.state().capabilities = capabilities;
    }

    /// Whether created and destroyed events are raised for the backend's own
    /// create and delete calls.
    pub fn set_emit_lifecycle(&self, emit: bool) {
        self.state().emit_lifecycle = emit;
    }

    /// Makes the next create, delete or set call fail.
    pub fn fail_next(&self, error: BackendError) {
        self.state().fail_next = Some(error);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn creates(&self) -> Vec<CreateRequest> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::Create(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn installed(&self) -> Vec<BackendBreakpoint> {
        self.state().installed.values().cloned().collect()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    /// Delivers an event to every listener, on the calling thread.
    pub fn emit(&self, event: BackendEvent) {
        self.emit_as(self.target.clone(), event);
    }

    /// Delivers an event as if raised by another target sharing this backend.
    pub fn emit_as(&self, target: TargetId, event: BackendEvent) {
        let event = TargetEvent { target, event };
        let listeners: Vec<_> = self
            .listeners()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.handle_event(&event);
        }
    }

    /// A breakpoint set behind the manager's back, e.g. from a debugger console.
    pub fn create_autonomously(
        &self,
        location: BackendLocation,
        condition: Condition,
        temporary: bool,
    ) -> BackendBreakpoint {
        let breakpoint = {
            let mut state = self.state();
            let breakpoint = BackendBreakpoint {
                id: Self::allocate(&mut state),
                location,
                enabled: true,
                condition,
                temporary,
                hardware: false,
                tracepoint: false,
                pass_count: 0,
            };
            state.installed.insert(breakpoint.id, breakpoint.clone());
            breakpoint
        };
        self.emit(BackendEvent::Created(breakpoint.clone()));
        breakpoint
    }

    fn allocate(state: &mut MockState) -> BackendId {
        state.next_id += 1;
        BackendId(state.next_id)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, Arc<dyn BackendEventListener>)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: BackendCall) -> Result<(), BackendError> {
        let mut state = self.state();
        state.calls.push(call);
        match state.fail_next.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl DebugBackend for MockBackend {
    fn capabilities(&self) -> Capabilities {
        self.state().capabilities
    }

    fn create_breakpoint(&self, request: &CreateRequest) -> Result<BackendBreakpoint, BackendError> {
        self.record(BackendCall::Create(request.clone()))?;

        let (breakpoint, emit) = {
            let mut state = self.state();
            let breakpoint = BackendBreakpoint {
                id: Self::allocate(&mut state),
                location: request.location.clone(),
                enabled: request.enabled || !state.capabilities.enable_on_create,
                condition: request.condition.clone(),
                temporary: false,
                hardware: request.hardware,
                tracepoint: request.tracepoint,
                pass_count: request.pass_count,
            };
            state.installed.insert(breakpoint.id, breakpoint.clone());
            (breakpoint, state.emit_lifecycle)
        };

        if emit {
            self.emit(BackendEvent::Created(breakpoint.clone()));
        }
        Ok(breakpoint)
    }

    fn delete_breakpoints(&self, breakpoints: &[BackendId]) -> Result<(), BackendError> {
        self.record(BackendCall::Delete(breakpoints.to_vec()))?;

        let (deleted, emit) = {
            let mut state = self.state();
            let deleted: Vec<BackendId> = breakpoints
                .iter()
                .filter(|id| state.installed.remove(*id).is_some())
                .copied()
                .collect();
            (deleted, state.emit_lifecycle)
        };

        if emit {
            for id in deleted {
                self.emit(BackendEvent::Destroyed(id));
            }
        }
        Ok(())
    }

    fn set_enabled(&self, breakpoint: BackendId, enabled: bool) -> Result<(), BackendError> {
        self.record(BackendCall::SetEnabled(breakpoint, enabled))?;
        match self.state().installed.get_mut(&breakpoint) {
            Some(installed) => {
                installed.enabled = enabled;
                Ok(())
            }
            None => Err(BackendError::Rejected(format!("no breakpoint {breakpoint}"))),
        }
    }

    fn set_condition(
        &self,
        breakpoint: BackendId,
        condition: &Condition,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::SetCondition(breakpoint, condition.clone()))?;
        match self.state().installed.get_mut(&breakpoint) {
            Some(installed) => {
                installed.condition = condition.clone();
                Ok(())
            }
            None => Err(BackendError::Rejected(format!("no breakpoint {breakpoint}"))),
        }
    }

    fn add_event_listener(&self, listener: Arc<dyn BackendEventListener>) -> ListenerId {
        let id = {
            let mut next = self
                .next_listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        self.listeners().push((id, listener));
        id
    }

    fn remove_event_listener(&self, listener: ListenerId) {
        self.listeners().retain(|(id, _)| *id != listener);
    }
}
