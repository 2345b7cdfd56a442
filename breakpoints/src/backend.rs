//! Contract of the live debug backend: breakpoint creation and mutation, and
//! the lifecycle events it reports for the breakpoints it holds.
use std::{fmt, path::PathBuf, sync::Arc};

use crate::{markers::Severity, types::MemoryRange, TargetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(pub u64);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type ListenerId = u64;

/// Resolved location of an installed breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendLocation {
    Line {
        file: PathBuf,
        line: u32,
    },
    Function {
        file: Option<PathBuf>,
        function: String,
    },
    Address {
        address: u64,
    },
    Watchpoint {
        expression: String,
        read: bool,
        write: bool,
        memory: Option<MemoryRange>,
    },
    Event {
        event_type: String,
        argument: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Condition {
    pub ignore_count: u32,
    pub expression: String,
    pub thread_ids: Vec<String>,
}

/// Handle to a breakpoint installed in the debuggee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendBreakpoint {
    pub id: BackendId,
    pub location: BackendLocation,
    pub enabled: bool,
    pub condition: Condition,
    pub temporary: bool,
    pub hardware: bool,
    pub tracepoint: bool,
    /// Hits after which a tracepoint stops collecting; 0 for no limit.
    pub pass_count: u32,
}

impl BackendBreakpoint {
    pub fn line(&self) -> Option<u32> {
        match &self.location {
            BackendLocation::Line { line, .. } => Some(*line),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub location: BackendLocation,
    pub condition: Condition,
    pub enabled: bool,
    pub hardware: bool,
    pub tracepoint: bool,
    pub pass_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The session can hold breakpoints at all.
    pub breakpoints: bool,
    /// `create_breakpoint` honours `CreateRequest::enabled`. Backends without
    /// it create every breakpoint enabled.
    pub enable_on_create: bool,
    pub tracepoints: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            breakpoints: true,
            enable_on_create: true,
            tracepoints: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("unresolved breakpoint location: {0}")]
    Unresolved(String),
    #[error("backend rejected request: {0}")]
    Rejected(String),
    #[error("debug backend is detached")]
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Created(BackendBreakpoint),
    Destroyed(BackendId),
    Changed(BackendBreakpoint),
    Moved {
        breakpoint: BackendId,
        line: u32,
    },
    Problem {
        breakpoint: BackendId,
        description: String,
        severity: Severity,
        kind: String,
    },
    ExecutableReloaded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEvent {
    pub target: TargetId,
    pub event: BackendEvent,
}

/// Receives backend events, on a thread owned by the backend.
pub trait BackendEventListener: Send + Sync {
    fn handle_event(&self, event: &TargetEvent);
}

pub trait DebugBackend: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn create_breakpoint(
        &self,
        request: &CreateRequest,
    ) -> Result<BackendBreakpoint, BackendError>;

    fn delete_breakpoints(&self, breakpoints: &[BackendId]) -> Result<(), BackendError>;

    fn set_enabled(&self, breakpoint: BackendId, enabled: bool) -> Result<(), BackendError>;

    fn set_condition(
        &self,
        breakpoint: BackendId,
        condition: &Condition,
    ) -> Result<(), BackendError>;

    fn add_event_listener(&self, listener: Arc<dyn BackendEventListener>) -> ListenerId;

    fn remove_event_listener(&self, listener: ListenerId);
}
