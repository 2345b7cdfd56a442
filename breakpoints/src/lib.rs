//! Synchronisation of platform breakpoints with the breakpoints installed in
//! live debug targets
pub mod backend;
mod executor;
pub mod filter;
mod internals;
mod manager;
pub mod locator;
pub mod map;
pub mod markers;
pub mod notifier;
pub mod store;
mod types;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


pub use manager::{BreakpointManager, Collaborators, ManagerConfig};
pub use notifier::{AttributeDelta, BreakpointNotifier, Event};
pub use types::{
    parse_address, BreakpointId, BreakpointKind, FilterExtension, MemoryRange,
    PlatformBreakpoint, TargetId, TargetInfo, DEFAULT_MODEL_ID,
};
